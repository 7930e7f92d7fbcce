use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use songsmith_core::{DomainError, DomainResult, SongId, UserId};

/// Title used when the creator does not supply one.
pub const DEFAULT_TITLE: &str = "Untitled";

/// Lifecycle status of a song.
///
/// Pending -> Processing -> {Completed | Failed}. Completed and Failed are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SongStatus {
    /// Persisted, waiting for the background executor.
    Pending,
    /// Generation in progress.
    Processing,
    /// Audio stored; `result_reference` is set.
    Completed,
    /// Generation or storage failed; `error_detail` is set.
    Failed,
}

impl SongStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SongStatus::Completed | SongStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SongStatus::Pending => "pending",
            SongStatus::Processing => "processing",
            SongStatus::Completed => "completed",
            SongStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SongStatus::Pending),
            "processing" => Some(SongStatus::Processing),
            "completed" => Some(SongStatus::Completed),
            "failed" => Some(SongStatus::Failed),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the status machine.
    pub fn can_transition_to(&self, next: SongStatus) -> bool {
        matches!(
            (self, next),
            (SongStatus::Pending, SongStatus::Processing)
                | (SongStatus::Processing, SongStatus::Completed)
                | (SongStatus::Processing, SongStatus::Failed)
        )
    }
}

impl core::fmt::Display for SongStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle step, applied atomically by the repository.
///
/// Each transition names the status it expects to find. Repositories apply it
/// as a compare-and-set: if the stored status differs, nothing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    StartProcessing,
    Complete { reference: String },
    Fail { detail: String },
}

impl Transition {
    pub fn expected_from(&self) -> SongStatus {
        match self {
            Transition::StartProcessing => SongStatus::Pending,
            Transition::Complete { .. } | Transition::Fail { .. } => SongStatus::Processing,
        }
    }

    pub fn target(&self) -> SongStatus {
        match self {
            Transition::StartProcessing => SongStatus::Processing,
            Transition::Complete { .. } => SongStatus::Completed,
            Transition::Fail { .. } => SongStatus::Failed,
        }
    }
}

/// Validated input for a new song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSong {
    pub owner_id: UserId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub prompt: String,
    pub token_budget: u32,
}

/// Owner-editable metadata. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Song record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub prompt: String,
    pub token_budget: u32,
    pub status: SongStatus,
    pub result_reference: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Song {
    /// Create a Pending song.
    pub fn create(input: NewSong, now: DateTime<Utc>) -> DomainResult<Self> {
        let prompt = input.prompt.trim();
        if prompt.is_empty() {
            return Err(DomainError::validation("prompt cannot be empty"));
        }
        if input.token_budget == 0 {
            return Err(DomainError::validation("token budget must be positive"));
        }
        let title = match input.title {
            Some(t) if t.trim().is_empty() => {
                return Err(DomainError::validation("title cannot be empty"));
            }
            Some(t) => t.trim().to_string(),
            None => DEFAULT_TITLE.to_string(),
        };

        Ok(Self {
            id: SongId::new(),
            owner_id: input.owner_id,
            title,
            description: input.description,
            prompt: prompt.to_string(),
            token_budget: input.token_budget,
            status: SongStatus::Pending,
            result_reference: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a lifecycle transition.
    ///
    /// Fails with `Conflict` when the current status is not the transition's
    /// expected predecessor; the record is left unchanged in that case.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != transition.expected_from() {
            return Err(DomainError::conflict(format!(
                "illegal transition {} -> {}",
                self.status,
                transition.target()
            )));
        }

        match transition {
            Transition::StartProcessing => {}
            Transition::Complete { reference } => {
                if reference.is_empty() {
                    return Err(DomainError::validation("result reference cannot be empty"));
                }
                self.result_reference = Some(reference.clone());
                self.error_detail = None;
            }
            Transition::Fail { detail } => {
                let detail = if detail.trim().is_empty() {
                    "unknown failure".to_string()
                } else {
                    detail.clone()
                };
                self.error_detail = Some(detail);
                self.result_reference = None;
            }
        }

        self.status = transition.target();
        self.touch(now);
        Ok(())
    }

    /// Apply owner-editable metadata. Status and result fields are never touched.
    pub fn apply_metadata(&mut self, patch: MetadataPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(title) = patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(DomainError::validation("title cannot be empty"));
            }
            self.title = title.to_string();
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        self.touch(now);
        Ok(())
    }

    /// Result fields agree with the status.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            SongStatus::Pending | SongStatus::Processing => {
                self.result_reference.is_none() && self.error_detail.is_none()
            }
            SongStatus::Completed => {
                self.result_reference.as_deref().is_some_and(|r| !r.is_empty())
                    && self.error_detail.is_none()
            }
            SongStatus::Failed => {
                self.error_detail.as_deref().is_some_and(|d| !d.is_empty())
                    && self.result_reference.is_none()
            }
        }
    }

    // updated_at never moves backwards, even if the wall clock does.
    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    const ALL: [SongStatus; 4] = [
        SongStatus::Pending,
        SongStatus::Processing,
        SongStatus::Completed,
        SongStatus::Failed,
    ];

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_song() -> Song {
        Song::create(
            NewSong {
                owner_id: UserId::new(),
                title: None,
                description: None,
                prompt: "calm piano".to_string(),
                token_budget: 100,
            },
            test_time(),
        )
        .unwrap()
    }

    fn any_transition() -> impl Strategy<Value = Transition> {
        prop_oneof![
            Just(Transition::StartProcessing),
            "[a-z/]{0,12}".prop_map(|reference| Transition::Complete { reference }),
            "[a-z ]{0,12}".prop_map(|detail| Transition::Fail { detail }),
        ]
    }

    #[test]
    fn create_trims_prompt_and_defaults_title() {
        let song = Song::create(
            NewSong {
                owner_id: UserId::new(),
                title: None,
                description: Some("rainy day".to_string()),
                prompt: "  lofi beat  ".to_string(),
                token_budget: 64,
            },
            test_time(),
        )
        .unwrap();

        assert_eq!(song.prompt, "lofi beat");
        assert_eq!(song.title, DEFAULT_TITLE);
        assert_eq!(song.status, SongStatus::Pending);
        assert!(song.is_consistent());
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let err = Song::create(
            NewSong {
                owner_id: UserId::new(),
                title: None,
                description: None,
                prompt: "   ".to_string(),
                token_budget: 64,
            },
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = Song::create(
            NewSong {
                owner_id: UserId::new(),
                title: Some("x".to_string()),
                description: None,
                prompt: "drums".to_string(),
                token_budget: 0,
            },
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn only_forward_edges_exist() {
        for from in ALL {
            for to in ALL {
                let expected = matches!(
                    (from, to),
                    (SongStatus::Pending, SongStatus::Processing)
                        | (SongStatus::Processing, SongStatus::Completed)
                        | (SongStatus::Processing, SongStatus::Failed)
                );
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
        assert!(SongStatus::Completed.is_terminal());
        assert!(SongStatus::Failed.is_terminal());
    }

    #[test]
    fn happy_path_sets_reference() {
        let mut song = new_song();
        song.apply(&Transition::StartProcessing, test_time()).unwrap();
        assert!(song.is_consistent());

        song.apply(
            &Transition::Complete {
                reference: "/storage/a.wav".to_string(),
            },
            test_time() + Duration::seconds(5),
        )
        .unwrap();

        assert_eq!(song.status, SongStatus::Completed);
        assert_eq!(song.result_reference.as_deref(), Some("/storage/a.wav"));
        assert!(song.error_detail.is_none());
        assert_eq!(song.updated_at, test_time() + Duration::seconds(5));
    }

    #[test]
    fn cannot_complete_from_pending() {
        let mut song = new_song();
        let before = song.clone();
        let err = song
            .apply(
                &Transition::Complete {
                    reference: "/storage/a.wav".to_string(),
                },
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(song, before);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut song = new_song();
        song.apply(&Transition::StartProcessing, test_time()).unwrap();
        song.apply(
            &Transition::Fail {
                detail: "model crashed".to_string(),
            },
            test_time(),
        )
        .unwrap();

        assert!(song.apply(&Transition::StartProcessing, test_time()).is_err());
        assert!(song
            .apply(
                &Transition::Complete {
                    reference: "/storage/a.wav".to_string()
                },
                test_time()
            )
            .is_err());
        assert_eq!(song.status, SongStatus::Failed);
        assert_eq!(song.error_detail.as_deref(), Some("model crashed"));
    }

    #[test]
    fn updated_at_does_not_go_backwards() {
        let mut song = new_song();
        song.apply(&Transition::StartProcessing, test_time() - Duration::hours(1))
            .unwrap();
        assert_eq!(song.updated_at, test_time());
    }

    #[test]
    fn metadata_patch_leaves_status_alone() {
        let mut song = new_song();
        song.apply(&Transition::StartProcessing, test_time()).unwrap();
        song.apply_metadata(
            MetadataPatch {
                title: Some("Evening".to_string()),
                description: Some("for reading".to_string()),
            },
            test_time(),
        )
        .unwrap();

        assert_eq!(song.title, "Evening");
        assert_eq!(song.status, SongStatus::Processing);

        let err = song
            .apply_metadata(
                MetadataPatch {
                    title: Some(" ".to_string()),
                    description: None,
                },
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn status_strings_parse_back() {
        for status in ALL {
            assert_eq!(SongStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SongStatus::parse("cancelled"), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of transitions is attempted, the song only
        /// ever walks forward edges and its result fields match its status.
        #[test]
        fn arbitrary_transition_sequences_respect_the_machine(
            steps in prop::collection::vec(any_transition(), 0..12)
        ) {
            let mut song = new_song();
            for step in steps {
                let before = song.status;
                match song.apply(&step, test_time()) {
                    Ok(()) => prop_assert!(before.can_transition_to(song.status)),
                    Err(_) => prop_assert_eq!(before, song.status),
                }
                prop_assert!(song.is_consistent());
            }
        }
    }
}
