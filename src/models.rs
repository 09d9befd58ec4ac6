use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of a message listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: Option<String>,
}

impl MessageSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
        }
    }
}

/// A single page returned by the list endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<MessageSummary>,
    pub next_page_token: Option<String>,
}

/// Reference to attachment bytes that must be fetched separately
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub attachment_id: String,
    /// Size reported by the provider, before any transfer encoding
    pub declared_size: u64,
}

/// Content carried by a leaf part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    /// Already-decoded bytes delivered with the message
    Inline(Vec<u8>),
    /// Stored remotely, fetched with the attachments endpoint
    Remote(AttachmentRef),
    Empty,
}

/// Node of the MIME part tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Container {
        mime_type: String,
        children: Vec<Part>,
    },
    Leaf {
        mime_type: String,
        filename: Option<String>,
        body: PartBody,
    },
}

impl Part {
    pub fn mime_type(&self) -> &str {
        match self {
            Part::Container { mime_type, .. } | Part::Leaf { mime_type, .. } => mime_type,
        }
    }

    /// Leaf parts in depth-first document order
    pub fn leaves(&self) -> Vec<&Part> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Part>) {
        match self {
            Part::Container { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            leaf @ Part::Leaf { .. } => out.push(leaf),
        }
    }
}

/// Full message content as returned by the get endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetail {
    pub id: String,
    pub thread_id: Option<String>,
    /// Header name to value; names are case-sensitive and the last duplicate wins
    pub headers: HashMap<String, String>,
    pub label_ids: Vec<String>,
    pub snippet: String,
    pub payload: Part,
}

impl MessageDetail {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or("No Subject")
    }

    pub fn from(&self) -> &str {
        self.header("From").unwrap_or("Unknown")
    }

    pub fn date(&self) -> &str {
        self.header("Date").unwrap_or("")
    }

    /// Build the header map from `(name, value)` pairs in wire order
    pub fn headers_from_pairs<I>(pairs: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut headers = HashMap::new();
        for (name, value) in pairs {
            headers.insert(name, value);
        }
        headers
    }
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    /// Raw `Date` header as received
    pub date: String,
    pub labels: Vec<String>,
    pub snippet: String,
}

impl From<&MessageDetail> for MessageRecord {
    fn from(detail: &MessageDetail) -> Self {
        Self {
            id: detail.id.clone(),
            thread_id: detail.thread_id.clone(),
            subject: detail.subject().to_string(),
            from: detail.from().to_string(),
            to: detail.header("To").unwrap_or("").to_string(),
            cc: detail.header("Cc").unwrap_or("").to_string(),
            date: detail.date().to_string(),
            labels: detail.label_ids.clone(),
            snippet: detail.snippet.clone(),
        }
    }
}
