//! Gmail API adapter
//!
//! `MailApi` is the seam between the download loop and the provider. The
//! production implementation, `GmailApi`, issues raw calls against the
//! `google-gmail1` hub and converts the responses into crate models. It does
//! no retrying or rate limiting of its own; that happens one layer up in
//! `BackoffExecutor`.

use async_trait::async_trait;
use google_gmail1::api::{ListMessagesResponse, Message, MessagePart, MessagePartBody};
use std::sync::Arc;
use tracing::debug;

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::models::{AttachmentRef, MessageDetail, MessagePage, MessageSummary, Part, PartBody};

/// Raw provider operations used by the archiver
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Fetch one page of message ids matching `query`
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage>;

    /// Fetch a full message including its part tree
    async fn get_message(&self, id: &str) -> Result<MessageDetail>;

    /// Fetch decoded attachment bytes
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    /// Permanently delete a message
    async fn delete_message(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<T: MailApi + ?Sized> MailApi for Arc<T> {
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        (**self).list_messages(query, page_size, page_token).await
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail> {
        (**self).get_message(id).await
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        (**self).get_attachment(message_id, attachment_id).await
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        (**self).delete_message(id).await
    }
}

/// `MailApi` backed by the Gmail REST API
pub struct GmailApi {
    hub: GmailHub,
    scopes: Vec<String>,
}

impl GmailApi {
    /// Wrap an authenticated hub; every call requests `scopes`
    pub fn new<I, S>(hub: GmailHub, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hub,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn hub(&self) -> &GmailHub {
        &self.hub
    }

    /// Address of the authenticated account
    pub async fn account_email(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .add_scopes(&self.scopes)
            .doit()
            .await?;

        profile
            .email_address
            .ok_or_else(|| GmailError::InvalidMessageFormat("Profile has no email address".to_string()))
    }
}

#[async_trait]
impl MailApi for GmailApi {
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        let mut call = self
            .hub
            .users()
            .messages_list("me")
            .q(query)
            .max_results(page_size);

        if let Some(token) = page_token.as_deref() {
            call = call.page_token(token);
        }

        let (_, response) = call.add_scopes(&self.scopes).doit().await?;
        Ok(convert_list_response(response))
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail> {
        let (_, message) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .add_scopes(&self.scopes)
            .doit()
            .await?;

        convert_message(message)
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let (_, body) = self
            .hub
            .users()
            .messages_attachments_get("me", message_id, attachment_id)
            .add_scopes(&self.scopes)
            .doit()
            .await?;

        let data = body.data.unwrap_or_default();
        debug!(
            "Fetched attachment {} of message {} ({} bytes)",
            attachment_id,
            message_id,
            data.len()
        );
        Ok(data)
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.hub
            .users()
            .messages_delete("me", id)
            .add_scopes(&self.scopes)
            .doit()
            .await?;
        Ok(())
    }
}

fn convert_list_response(response: ListMessagesResponse) -> MessagePage {
    let messages = response
        .messages
        .unwrap_or_default()
        .into_iter()
        .filter_map(|msg| {
            msg.id.map(|id| MessageSummary {
                id,
                thread_id: msg.thread_id,
            })
        })
        .collect();

    MessagePage {
        messages,
        next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
    }
}

/// Convert a `format=full` API message into a `MessageDetail`
pub fn convert_message(msg: Message) -> Result<MessageDetail> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let payload = msg
        .payload
        .ok_or_else(|| GmailError::InvalidMessageFormat(format!("Message {} has no payload", id)))?;

    let header_pairs = payload
        .headers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| match (h.name, h.value) {
            (Some(name), Some(value)) => Some((name, value)),
            _ => None,
        });
    let headers = MessageDetail::headers_from_pairs(header_pairs);

    Ok(MessageDetail {
        id,
        thread_id: msg.thread_id,
        headers,
        label_ids: msg.label_ids.unwrap_or_default(),
        snippet: msg.snippet.unwrap_or_default(),
        payload: convert_part(payload),
    })
}

fn convert_part(part: MessagePart) -> Part {
    let mime_type = part.mime_type.unwrap_or_default();

    match part.parts {
        Some(children) => Part::Container {
            mime_type,
            children: children.into_iter().map(convert_part).collect(),
        },
        None => Part::Leaf {
            mime_type,
            filename: part.filename.filter(|f| !f.is_empty()),
            body: convert_body(part.body),
        },
    }
}

fn convert_body(body: Option<MessagePartBody>) -> PartBody {
    let Some(body) = body else {
        return PartBody::Empty;
    };

    if let Some(attachment_id) = body.attachment_id.filter(|a| !a.is_empty()) {
        return PartBody::Remote(AttachmentRef {
            attachment_id,
            declared_size: body.size.unwrap_or(0).max(0) as u64,
        });
    }

    match body.data {
        Some(data) if !data.is_empty() => PartBody::Inline(data),
        _ => PartBody::Empty,
    }
}
