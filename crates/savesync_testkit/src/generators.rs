//! Property-based test generators using proptest.

use proptest::prelude::*;
use savesync_storage::{hash_bytes, StorageKey};

/// Strategy for save contents (arbitrary bytes, possibly empty).
pub fn save_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Strategy for game display names.
pub fn game_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 :'-]{0,39}").expect("Invalid regex")
}

/// Strategy for valid storage keys.
pub fn storage_key_strategy() -> impl Strategy<Value = StorageKey> {
    prop::string::string_regex("[a-z0-9][a-z0-9_-]{0,31}\\.bin")
        .expect("Invalid regex")
        .prop_map(|s| StorageKey::new(s).expect("Generated key should be valid"))
}

/// Strategy for strings that must be rejected as storage keys.
pub fn invalid_storage_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just(".".to_string()),
        Just("..".to_string()),
        Just("LOCK".to_string()),
        prop::string::string_regex("[a-z]{0,8}[/\\\\][a-z]{0,8}").expect("Invalid regex"),
    ]
}

/// Spellings of a correct hash that must still be accepted.
pub fn declared_hash_strategy(data: &[u8]) -> impl Strategy<Value = String> {
    let hash = hash_bytes(data).as_str().to_string();
    prop_oneof![
        Just(hash.clone()),
        Just(hash.to_uppercase()),
        Just(format!("  {hash}\n")),
    ]
}

/// One upload attempt in a generated sequence.
#[derive(Debug, Clone)]
pub enum UploadAttempt {
    /// Upload with the correct hash.
    Valid {
        /// Save contents.
        data: Vec<u8>,
    },
    /// Upload declaring the hash of different bytes.
    Corrupted {
        /// Save contents.
        data: Vec<u8>,
    },
    /// Upload declaring no hash.
    Unhashed {
        /// Save contents.
        data: Vec<u8>,
    },
}

impl UploadAttempt {
    /// Returns the bytes sent.
    pub fn data(&self) -> &[u8] {
        match self {
            UploadAttempt::Valid { data }
            | UploadAttempt::Corrupted { data }
            | UploadAttempt::Unhashed { data } => data,
        }
    }

    /// Returns the hash the client declares.
    pub fn declared_hash(&self) -> String {
        match self {
            UploadAttempt::Valid { data } => hash_bytes(data).as_str().to_string(),
            UploadAttempt::Corrupted { data } => {
                let mut other = data.clone();
                other.push(0xFF);
                hash_bytes(&other).as_str().to_string()
            }
            UploadAttempt::Unhashed { .. } => String::new(),
        }
    }

    /// Returns true if the attempt should commit.
    pub fn should_commit(&self) -> bool {
        matches!(self, UploadAttempt::Valid { .. })
    }
}

/// Strategy for upload attempts, mostly valid.
pub fn upload_attempt_strategy() -> impl Strategy<Value = UploadAttempt> {
    let data = || prop::collection::vec(any::<u8>(), 0..512);
    prop_oneof![
        3 => data().prop_map(|data| UploadAttempt::Valid { data }),
        2 => data().prop_map(|data| UploadAttempt::Corrupted { data }),
        1 => data().prop_map(|data| UploadAttempt::Unhashed { data }),
    ]
}

/// Strategy for a sequence of upload attempts.
pub fn upload_sequence_strategy(
    min_attempts: usize,
    max_attempts: usize,
) -> impl Strategy<Value = Vec<UploadAttempt>> {
    prop::collection::vec(upload_attempt_strategy(), min_attempts..max_attempts)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestEnv;
    use savesync_core::{CoreError, UserId};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn invalid_keys_are_rejected(key in invalid_storage_key_strategy()) {
            prop_assert!(StorageKey::new(key).is_err());
        }

        #[test]
        fn valid_keys_end_in_bin(key in storage_key_strategy()) {
            prop_assert!(key.as_str().ends_with(".bin"));
        }

        #[test]
        fn any_spelling_of_the_hash_commits(
            (data, declared) in save_data_strategy()
                .prop_flat_map(|data| (Just(data.clone()), declared_hash_strategy(&data)))
        ) {
            let env = TestEnv::new();
            let game = env.create_game(UserId(1), "g");
            let receipt = env.upload_with_hash(UserId(1), game.id, &data, &declared).unwrap();
            prop_assert_eq!(receipt.record.revision.0, 1);
            prop_assert_eq!(env.download(UserId(1), game.id).unwrap(), data);
        }

        #[test]
        fn revision_counts_successful_commits(attempts in upload_sequence_strategy(1, 12)) {
            let env = TestEnv::new();
            let user = UserId(1);
            let game = env.create_game(user, "g");
            let mut committed = 0u64;
            let mut last: Option<Vec<u8>> = None;

            for attempt in &attempts {
                let result =
                    env.upload_with_hash(user, game.id, attempt.data(), &attempt.declared_hash());
                if attempt.should_commit() {
                    prop_assert!(result.is_ok());
                    committed += 1;
                    last = Some(attempt.data().to_vec());
                } else {
                    let rejected = matches!(
                        result,
                        Err(CoreError::HashMismatch { .. }) | Err(CoreError::InvalidRequest { .. })
                    );
                    prop_assert!(rejected);
                }
                prop_assert!(env.coordinator.registry().is_empty());
            }

            let record = env.game(user, game.id).record;
            prop_assert_eq!(record.revision.0, committed);
            prop_assert_eq!(record.available, last.is_some());
            prop_assert!(record.is_consistent());
            match last {
                Some(data) => {
                    prop_assert_eq!(env.download(user, game.id).unwrap(), data);
                }
                None => {
                    prop_assert!(env.download(user, game.id).is_err());
                }
            }
        }
    }
}
