//! Admission predicates and the AND-chain pipeline.
//!
//! A pipeline is an ordered list of predicates keyed by string id; adding
//! under an existing id replaces that predicate in place. An event passes
//! when every predicate matches (an empty pipeline admits everything).
//! Predicates never mutate the event.

use relay_protocol::{Event, EventData, EventType, FilterConfig};

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// One admission predicate. An empty selector list always admits: the
/// restriction only exists once something is listed.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Username membership, case-insensitive.
    User { usernames: Vec<String> },
    /// Substring match against the searchable projection of the event.
    Keyword {
        keywords: Vec<String>,
        case_sensitive: bool,
    },
    /// Event-kind membership.
    EventType { allowed: Vec<EventType> },
}

impl Predicate {
    pub fn user(usernames: Vec<String>) -> Self {
        Predicate::User {
            usernames: usernames.into_iter().map(|u| u.to_lowercase()).collect(),
        }
    }

    pub fn keyword(keywords: Vec<String>) -> Self {
        Predicate::Keyword {
            keywords,
            case_sensitive: false,
        }
    }

    pub fn keyword_case_sensitive(keywords: Vec<String>) -> Self {
        Predicate::Keyword {
            keywords,
            case_sensitive: true,
        }
    }

    pub fn event_type(allowed: Vec<EventType>) -> Self {
        Predicate::EventType { allowed }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Predicate::User { usernames } => {
                usernames.is_empty()
                    || usernames
                        .iter()
                        .any(|u| u == &event.user.username.to_lowercase())
            }
            Predicate::Keyword {
                keywords,
                case_sensitive,
            } => {
                if keywords.is_empty() {
                    return true;
                }
                let projection = searchable_projection(event);
                if *case_sensitive {
                    keywords.iter().any(|k| projection.contains(k.as_str()))
                } else {
                    let haystack = projection.to_lowercase();
                    keywords
                        .iter()
                        .any(|k| haystack.contains(&k.to_lowercase()))
                }
            }
            Predicate::EventType { allowed } => {
                allowed.is_empty() || allowed.contains(&event.kind)
            }
        }
    }
}

/// The text a keyword predicate searches: the acting user's names plus the
/// kind-specific textual fields.
pub fn searchable_projection(event: &Event) -> String {
    let mut parts: Vec<&str> = vec![&event.user.username, &event.user.display_name];
    match &event.data {
        EventData::Post(post) => {
            parts.push(&post.tweet.body.text);
        }
        EventData::Profile(profile) => {
            parts.push(&profile.user.profile.name);
            parts.push(&profile.user.profile.description.text);
        }
        EventData::Following(follow) => {
            parts.push(&follow.following.handle);
            parts.push(&follow.following.profile.name);
        }
    }
    parts.join(" ")
}

// ---------------------------------------------------------------------------
// FilterPipeline
// ---------------------------------------------------------------------------

/// Ordered AND-chain of predicates. Short-circuits on the first rejection.
#[derive(Debug, Default)]
pub struct FilterPipeline {
    predicates: Vec<(String, Predicate)>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        FilterPipeline::default()
    }

    /// Build the pipeline the startup config describes. Empty config
    /// fields add no predicate at all.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut pipeline = FilterPipeline::new();
        if !config.users.is_empty() {
            pipeline.add("users", Predicate::user(config.users.clone()));
        }
        if !config.keywords.is_empty() {
            pipeline.add("keywords", Predicate::keyword(config.keywords.clone()));
        }
        if !config.event_types.is_empty() {
            pipeline.add("event-types", Predicate::event_type(config.event_types.clone()));
        }
        pipeline
    }

    /// Add a predicate; an existing predicate with the same id is replaced
    /// in place, keeping its position in the chain.
    pub fn add(&mut self, id: &str, predicate: Predicate) {
        if let Some(existing) = self.predicates.iter_mut().find(|(pid, _)| pid == id) {
            existing.1 = predicate;
        } else {
            self.predicates.push((id.to_owned(), predicate));
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.predicates.len();
        self.predicates.retain(|(pid, _)| pid != id);
        self.predicates.len() != before
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// AND over every predicate; true for an empty pipeline.
    pub fn apply(&self, event: &Event) -> bool {
        self.predicates.iter().all(|(_, p)| p.matches(event))
    }
}
