//! TwiML response builder for carrier signaling replies.
//!
//! Only the verbs the bridge actually emits are modeled. Attribute values and
//! text content are XML-escaped.

/// Escape the five XML special characters in attribute values and text.
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Options for the `<Gather>` verb.
#[derive(Debug, Clone)]
pub struct GatherOptions {
    pub input: String,
    pub action: String,
    pub method: String,
    pub timeout: u32,
    pub speech_timeout: String,
    pub language: Option<String>,
}

impl GatherOptions {
    pub fn speech(action: impl Into<String>) -> Self {
        Self {
            input: "speech".to_string(),
            action: action.into(),
            method: "POST".to_string(),
            timeout: 5,
            speech_timeout: "auto".to_string(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Incremental builder for a `<Response>` document.
#[derive(Debug, Default, Clone)]
pub struct TwimlResponse {
    body: String,
}

impl TwimlResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<Say>` with optional carrier voice and language attributes.
    pub fn say(mut self, text: &str, voice: Option<&str>, language: Option<&str>) -> Self {
        self.body.push_str("<Say");
        if let Some(voice) = voice {
            self.body
                .push_str(&format!(" voice=\"{}\"", escape_xml(voice)));
        }
        if let Some(language) = language {
            self.body
                .push_str(&format!(" language=\"{}\"", escape_xml(language)));
        }
        self.body.push('>');
        self.body.push_str(&escape_xml(text));
        self.body.push_str("</Say>");
        self
    }

    pub fn hangup(mut self) -> Self {
        self.body.push_str("<Hangup/>");
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        self.body
            .push_str(&format!("<Redirect>{}</Redirect>", escape_xml(url)));
        self
    }

    pub fn reject(mut self) -> Self {
        self.body.push_str("<Reject/>");
        self
    }

    /// `<Connect><Stream/></Connect>` pointing the carrier's media stream at
    /// the bridge's WebSocket endpoint.
    pub fn connect_stream(mut self, url: &str, track: &str) -> Self {
        self.body.push_str(&format!(
            "<Connect><Stream url=\"{}\" track=\"{}\"/></Connect>",
            escape_xml(url),
            escape_xml(track)
        ));
        self
    }

    /// `<Gather>` with an optional nested `<Say>` prompt.
    pub fn gather(mut self, options: &GatherOptions, prompt: Option<(&str, Option<&str>)>) -> Self {
        self.body.push_str(&format!(
            "<Gather input=\"{}\" method=\"{}\" timeout=\"{}\" speechTimeout=\"{}\" action=\"{}\"",
            escape_xml(&options.input),
            escape_xml(&options.method),
            options.timeout,
            escape_xml(&options.speech_timeout),
            escape_xml(&options.action)
        ));
        if let Some(language) = &options.language {
            self.body
                .push_str(&format!(" language=\"{}\"", escape_xml(language)));
        }
        self.body.push('>');
        if let Some((text, voice)) = prompt {
            self.body.push_str("<Say");
            if let Some(voice) = voice {
                self.body
                    .push_str(&format!(" voice=\"{}\"", escape_xml(voice)));
            }
            self.body.push('>');
            self.body.push_str(&escape_xml(text));
            self.body.push_str("</Say>");
        }
        self.body.push_str("</Gather>");
        self
    }

    /// Render the complete XML document.
    pub fn build(self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{}</Response>",
            self.body
        )
    }
}
