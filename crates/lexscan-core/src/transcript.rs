use crate::types::{ChatMessage, JobId, MessageBody, MessageId};

/// Ordered chat history of one session.
///
/// Messages produced by an analysis run carry that run's `JobId`; all
/// updates address messages by id, never by position.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append a progress placeholder for `job`, dropping any earlier one the
    /// same job left behind.
    pub fn push_placeholder(&mut self, job: JobId, phrase: &str) -> ChatMessage {
        self.messages
            .retain(|m| !(m.job == Some(job) && m.is_progress_placeholder()));
        let message = ChatMessage::bot(
            MessageBody::Progress {
                phrase: phrase.to_string(),
            },
            Some(job),
        );
        self.messages.push(message.clone());
        message
    }

    /// Rewrite the phrase of a placeholder. Returns the updated message, or
    /// None if `id` is gone or is not a placeholder.
    pub fn set_phrase(&mut self, id: MessageId, phrase: &str) -> Option<ChatMessage> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        match &mut message.body {
            MessageBody::Progress { phrase: current } => {
                *current = phrase.to_string();
                Some(message.clone())
            },
            _ => None,
        }
    }

    pub fn remove(&mut self, id: MessageId) -> Option<ChatMessage> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(pos))
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn placeholder_for(&self, job: JobId) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .find(|m| m.job == Some(job) && m.is_progress_placeholder())
    }

    pub fn placeholder_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_progress_placeholder())
            .count()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sender;

    #[test]
    fn placeholder_is_updated_by_identity() {
        let mut t = Transcript::new();
        let a = JobId::new();
        let b = JobId::new();
        let pa = t.push_placeholder(a, "Reading");
        let pb = t.push_placeholder(b, "Reading");

        t.set_phrase(pa.id, "Scoring").unwrap();

        assert_eq!(t.get(pa.id).unwrap().plain_text(), "Scoring");
        assert_eq!(t.get(pb.id).unwrap().plain_text(), "Reading");
    }

    #[test]
    fn one_placeholder_per_job() {
        let mut t = Transcript::new();
        let job = JobId::new();
        t.push_placeholder(job, "one");
        let second = t.push_placeholder(job, "two");
        assert_eq!(t.placeholder_count(), 1);
        assert_eq!(t.placeholder_for(job).map(|m| m.id), Some(second.id));
    }

    #[test]
    fn set_phrase_ignores_non_placeholders() {
        let mut t = Transcript::new();
        let id = t.push(ChatMessage::user("hello", Vec::new()));
        assert!(t.set_phrase(id, "nope").is_none());
        assert_eq!(t.get(id).unwrap().plain_text(), "hello");
    }

    #[test]
    fn remove_returns_message() {
        let mut t = Transcript::new();
        let job = JobId::new();
        let p = t.push_placeholder(job, "x");
        let removed = t.remove(p.id).unwrap();
        assert_eq!(removed.sender, Sender::Bot);
        assert!(t.is_empty());
        assert!(t.remove(p.id).is_none());
    }
}
