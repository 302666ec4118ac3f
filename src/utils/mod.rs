pub mod agent_client;
pub mod phone;

pub use agent_client::{AgentClient, AgentError};
pub use phone::normalize_phone_number;
