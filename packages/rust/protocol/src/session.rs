//! Session provider: logs on once and hands out the session token.

use assetmirror_shared::{Credentials, MirrorError, Result, Session};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{info, instrument};

use crate::client::ServiceClient;
use crate::parser::path_ends_with;
use crate::request::{SERVICE_LOGON, ServiceRequest};

/// Log on with `credentials` and return the session token.
///
/// Any failure (transport, non-2xx, error reply, missing token) is an
/// [`MirrorError::Authentication`]; there is no retry at this layer.
#[instrument(skip_all, fields(domain = %credentials.domain, user = %credentials.user))]
pub async fn authenticate(client: &ServiceClient, credentials: &Credentials) -> Result<Session> {
    let request = ServiceRequest::new(SERVICE_LOGON)
        .arg("domain", credentials.domain.as_str())
        .arg("user", credentials.user.as_str())
        .arg("password", credentials.password.as_str());

    let body = client
        .call_text(&request, None)
        .await
        .map_err(|e| MirrorError::authentication(e.to_string()))?;

    let session = parse_session_token(&body)?;
    info!(endpoint = %client.endpoint(), "session established");
    Ok(session)
}

/// Extract the token at `response/reply/result/session`.
pub fn parse_session_token(xml: &str) -> Result<Session> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut open: Vec<String> = Vec::new();
    let mut error_reply: Option<String> = None;
    let mut token: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| MirrorError::authentication(format!("unreadable logon reply: {e}")))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "reply" {
                    let is_error = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"error"
                    });
                    if is_error {
                        error_reply = Some(String::new());
                    }
                }
                open.push(name);
            }
            Event::End(_) => {
                open.pop();
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|e| MirrorError::authentication(format!("bad logon reply: {e}")))?;
                if path_ends_with(&open, &["reply", "result", "session"]) {
                    token = Some(text.trim().to_string());
                } else if let Some(message) = error_reply.as_mut() {
                    if path_ends_with(&open, &["message"]) {
                        message.push_str(text.trim());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(message) = error_reply {
        return Err(MirrorError::authentication(if message.is_empty() {
            "logon rejected".to_string()
        } else {
            message
        }));
    }

    token
        .filter(|t| !t.is_empty())
        .map(Session::new)
        .ok_or_else(|| MirrorError::authentication("logon reply carried no session token"))
}
