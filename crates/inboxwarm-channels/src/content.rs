//! Canned conversational content for warmup mail.

use async_trait::async_trait;
use inboxwarm_core::error::{Result, WarmupError};
use inboxwarm_core::traits::{Composed, ContentKind, ContentSource};
use rand::Rng;
use rand::seq::SliceRandom;

const SUBJECTS: &[&str] = &[
    "Quick question about next week",
    "Following up on our chat",
    "Notes from today",
    "Lunch on Thursday?",
    "Thoughts on the draft",
    "Checking in",
    "Agenda for the sync",
    "Small update",
];

const OPENERS: &[&str] = &["Hi,", "Hello,", "Hey there,", "Good morning,"];

const BODIES: &[&str] = &[
    "I wanted to follow up on what we discussed. Let me know when you have a minute to go over the details.",
    "Sharing a couple of notes from earlier. Nothing urgent, just want to make sure we are aligned.",
    "Are you around later this week? It would be good to catch up on where things stand.",
    "I took another pass at the draft and tightened a few sections. Happy to hear what you think.",
    "Just checking in to see how things are going on your side.",
];

const REPLIES: &[&str] = &[
    "Thanks for the note, that works for me.",
    "Sounds good, I will take a look and get back to you.",
    "Appreciate the update. Let's pick this up later this week.",
    "Got it, thanks! I will follow up tomorrow.",
    "Thanks, this is helpful.",
];

const SIGN_OFFS: &[&str] = &["Best,", "Thanks,", "Cheers,", "Talk soon,"];

/// `ContentSource` drawing from fixed phrase lists.
#[derive(Debug, Clone)]
pub struct StaticContent {
    subjects: Vec<String>,
    bodies: Vec<String>,
    replies: Vec<String>,
}

impl Default for StaticContent {
    fn default() -> Self {
        Self {
            subjects: SUBJECTS.iter().map(|s| s.to_string()).collect(),
            bodies: BODIES.iter().map(|s| s.to_string()).collect(),
            replies: REPLIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StaticContent {
    pub fn new(subjects: Vec<String>, bodies: Vec<String>, replies: Vec<String>) -> Result<Self> {
        if subjects.is_empty() || bodies.is_empty() || replies.is_empty() {
            return Err(WarmupError::Config("content lists must not be empty".into()));
        }
        Ok(Self { subjects, bodies, replies })
    }

    /// Synchronous: the thread RNG must not be held across an await.
    fn pick(&self, kind: &ContentKind) -> Composed {
        let mut rng = rand::thread_rng();
        let opener = OPENERS.choose(&mut rng).copied().unwrap_or("Hi,");
        let sign_off = SIGN_OFFS.choose(&mut rng).copied().unwrap_or("Best,");

        match kind {
            ContentKind::Outbound => {
                let subject = self.subjects.choose(&mut rng).cloned().unwrap_or_default();
                let body = self.bodies.choose(&mut rng).cloned().unwrap_or_default();
                let subject = if rng.gen_bool(0.3) {
                    format!("{subject} ({})", rng.gen_range(2..=9))
                } else {
                    subject
                };
                Composed {
                    subject,
                    body: format!("{opener}\n\n{body}\n\n{sign_off}"),
                }
            }
            ContentKind::Reply { subject } => {
                let body = self.replies.choose(&mut rng).cloned().unwrap_or_default();
                Composed {
                    subject: reply_subject(subject),
                    body: format!("{body}\n\n{sign_off}"),
                }
            }
        }
    }
}

#[async_trait]
impl ContentSource for StaticContent {
    async fn compose(&self, kind: ContentKind) -> Result<Composed> {
        Ok(self.pick(&kind))
    }
}

fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let prefixed = trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:"));
    if prefixed {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}
