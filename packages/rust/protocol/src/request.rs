//! Service request encoding.
//!
//! Every call is a single XML document:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <request><service name="asset.get" session="..."><args><id>1001</id></args></service></request>
//! ```

use assetmirror_shared::{MirrorError, Result, Session};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

/// Logon service.
pub const SERVICE_LOGON: &str = "system.logon";
/// Namespace enumeration service.
pub const SERVICE_QUERY: &str = "asset.query";
/// Single asset retrieval service.
pub const SERVICE_GET: &str = "asset.get";

/// A named service call with ordered key/value arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    service: String,
    args: Vec<(String, String)>,
}

impl ServiceRequest {
    /// Start a request for `service` with no arguments.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Value of the first argument named `key`.
    pub fn arg_value(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize the request body, attaching `session` when given.
    pub fn to_xml(&self, session: Option<&Session>) -> Result<String> {
        let mut writer = Writer::new(Vec::new());

        let mut service = BytesStart::new("service");
        service.push_attribute(("name", self.service.as_str()));
        if let Some(session) = session {
            service.push_attribute(("session", session.token()));
        }

        let mut events = vec![
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
            Event::Start(BytesStart::new("request")),
            Event::Start(service),
        ];
        if !self.args.is_empty() {
            events.push(Event::Start(BytesStart::new("args")));
            for (key, value) in &self.args {
                events.push(Event::Start(BytesStart::new(key.as_str())));
                events.push(Event::Text(BytesText::new(value)));
                events.push(Event::End(BytesEnd::new(key.as_str())));
            }
            events.push(Event::End(BytesEnd::new("args")));
        }
        events.push(Event::End(BytesEnd::new("service")));
        events.push(Event::End(BytesEnd::new("request")));

        for event in events {
            writer
                .write_event(event)
                .map_err(|e| MirrorError::parse(format!("failed to encode request: {e}")))?;
        }

        String::from_utf8(writer.into_inner())
            .map_err(|e| MirrorError::parse(format!("request is not UTF-8: {e}")))
    }
}
