//! User pseudonymization.
//!
//! Every user reference of an issue (`author`, `assigned_to`, journal
//! `user`, `watchers`) that carries an id is replaced by `{id, name}` where
//! `name` is `User_<id>` zero-padded to five digits. The pseudonym depends
//! only on the id, so the same user gets the same name everywhere.
//!
//! The id → `{original_name, anonymous_name}` mapping is written next to the
//! dataset for audit. By default an existing mapping file is loaded first so
//! the original names recorded by an earlier run are kept.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::files;
use crate::models::{Issue, UserRef};

const UNKNOWN_NAME: &str = "Unknown";

/// Pseudonym for a user id.
pub fn pseudonym(user_id: u64) -> String {
    format!("User_{:05}", user_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub original_name: String,
    pub anonymous_name: String,
}

/// Id → pseudonym mapping. First-seen original name wins.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: BTreeMap<u64, MappingEntry>,
    seeded: usize,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mapping file written by an earlier run; an absent file gives
    /// an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        let entries: BTreeMap<u64, MappingEntry> = files::read_json(path)?.unwrap_or_default();
        let seeded = entries.len();
        Ok(Self { entries, seeded })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        files::write_json_atomic(path, &self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that came from a previous mapping file.
    pub fn seeded(&self) -> usize {
        self.seeded
    }

    pub fn get(&self, user_id: u64) -> Option<&MappingEntry> {
        self.entries.get(&user_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&u64, &MappingEntry)> {
        self.entries.iter()
    }

    /// Replace one user reference. A reference without an id is returned
    /// unchanged.
    pub fn anonymize_user(&mut self, user: &UserRef) -> UserRef {
        let Some(id) = user.id else {
            return user.clone();
        };
        let entry = self.entries.entry(id).or_insert_with(|| MappingEntry {
            original_name: user
                .name
                .clone()
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            anonymous_name: pseudonym(id),
        });
        UserRef {
            id: Some(id),
            name: Some(entry.anonymous_name.clone()),
            extra: Default::default(),
        }
    }

    /// Anonymize every user reference of `issue` in place.
    pub fn anonymize_issue(&mut self, issue: &mut Issue) {
        if let Some(author) = issue.author.as_mut() {
            *author = self.anonymize_user(author);
        }
        if let Some(assignee) = issue.assigned_to.as_mut() {
            *assignee = self.anonymize_user(assignee);
        }
        if let Some(journals) = issue.journals.as_mut() {
            for journal in journals.iter_mut() {
                if let Some(user) = journal.user.as_mut() {
                    *user = self.anonymize_user(user);
                }
            }
        }
        if let Some(watchers) = issue.watchers.as_mut() {
            for watcher in watchers.iter_mut().filter(|w| w.id.is_some()) {
                *watcher = self.anonymize_user(watcher);
            }
        }
    }
}

/// Visit every user reference of an issue.
fn for_each_user<'a>(issue: &'a Issue, mut f: impl FnMut(&'a UserRef)) {
    issue.author.iter().for_each(&mut f);
    issue.assigned_to.iter().for_each(&mut f);
    for journal in issue.journals() {
        journal.user.iter().for_each(&mut f);
    }
    issue.watchers.iter().flatten().for_each(&mut f);
}

/// Result of comparing the anonymized dataset against its input.
#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub input_count: usize,
    pub output_count: usize,
    /// References with an id whose name is not the expected pseudonym.
    pub leaked: Vec<UserRef>,
    /// References without an id, left untouched.
    pub unidentified: usize,
    pub sample_author: Option<(String, String)>,
    pub sample_journal_user: Option<(String, String)>,
}

impl Verification {
    pub fn is_clean(&self) -> bool {
        self.input_count == self.output_count && self.leaked.is_empty()
    }
}

pub fn verify(original: &[Issue], anonymized: &[Issue]) -> Verification {
    let mut report = Verification {
        input_count: original.len(),
        output_count: anonymized.len(),
        ..Default::default()
    };

    for issue in anonymized {
        for_each_user(issue, |user| match user.id {
            Some(id) if user.name.as_deref() != Some(pseudonym(id).as_str()) => {
                report.leaked.push(user.clone())
            }
            Some(_) => {}
            None => report.unidentified += 1,
        });
    }

    let name_of = |u: &UserRef| u.name.clone().unwrap_or_else(|| "N/A".to_string());
    if let (Some(orig), Some(anon)) = (original.first(), anonymized.first()) {
        if let (Some(a), Some(b)) = (&orig.author, &anon.author) {
            report.sample_author = Some((name_of(a), name_of(b)));
        }
        if let (Some(a), Some(b)) = (
            orig.journals().first().and_then(|j| j.user.as_ref()),
            anon.journals().first().and_then(|j| j.user.as_ref()),
        ) {
            report.sample_journal_user = Some((name_of(a), name_of(b)));
        }
    }
    report
}

/// Run the `anonymize` command.
pub fn run_anonymize(
    config: &Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    mapping: Option<PathBuf>,
    fresh_mapping: bool,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.paths.enriched_file());
    let output = output.unwrap_or_else(|| config.paths.anonymized_file());
    let mapping_path = mapping.unwrap_or_else(|| config.paths.mapping_file());

    let original: Vec<Issue> = files::read_required_json(&input)?;
    let mut map = if fresh_mapping {
        IdentityMap::new()
    } else {
        IdentityMap::load(&mapping_path)?
    };
    if map.seeded() > 0 {
        info!(users = map.seeded(), "seeded from existing mapping");
    }

    let mut anonymized = original.clone();
    for issue in anonymized.iter_mut() {
        map.anonymize_issue(issue);
    }

    files::write_json_atomic(&output, &anonymized)?;
    map.save(&mapping_path)?;
    info!(
        issues = anonymized.len(),
        users = map.len(),
        "anonymized dataset written"
    );

    let report = verify(&original, &anonymized);
    if report.input_count != report.output_count {
        warn!(
            input = report.input_count,
            output = report.output_count,
            "issue count mismatch"
        );
    }
    for user in &report.leaked {
        warn!(user = ?user.id, "user reference not anonymized");
    }

    println!("anonymize");
    println!("  issues: {}", anonymized.len());
    println!("  unique users: {}", map.len());
    println!("  seeded users: {}", map.seeded());
    println!("  output: {}", output.display());
    println!("  mapping: {}", mapping_path.display());
    println!("verify");
    println!("  original issues: {}", report.input_count);
    println!("  anonymized issues: {}", report.output_count);
    println!("  leaked references: {}", report.leaked.len());
    println!("  references without id: {}", report.unidentified);
    if let Some((before, after)) = &report.sample_author {
        println!("  sample author: {} -> {}", before, after);
    }
    if let Some((before, after)) = &report.sample_journal_user {
        println!("  sample journal user: {} -> {}", before, after);
    }
    println!("sample mappings");
    for (id, entry) in map.entries().take(10) {
        println!(
            "  {}: '{}' -> '{}'",
            id, entry.original_name, entry.anonymous_name
        );
    }
    if map.len() > 10 {
        println!("  ... and {} more users", map.len() - 10);
    }

    if !report.is_clean() {
        anyhow::bail!("Anonymization verification failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Journal;
    use serde_json::json;
    use tempfile::TempDir;

    fn issue_with_one_user_everywhere() -> Issue {
        let mut author = UserRef::new(42, "Alice");
        author.extra.insert("mail".into(), json!("alice@example.org"));
        Issue {
            id: 1,
            author: Some(author),
            assigned_to: Some(UserRef::new(42, "Alice A.")),
            journals: Some(vec![Journal {
                user: Some(UserRef::new(42, "alice")),
                notes: Some("done".into()),
                ..Default::default()
            }]),
            watchers: Some(vec![
                UserRef::new(7, "Bob"),
                UserRef {
                    name: Some("Ghost".into()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn pseudonym_is_zero_padded() {
        assert_eq!(pseudonym(42), "User_00042");
        assert_eq!(pseudonym(123456), "User_123456");
    }

    #[test]
    fn same_id_in_three_fields_maps_once() {
        let mut map = IdentityMap::new();
        let mut issue = issue_with_one_user_everywhere();
        map.anonymize_issue(&mut issue);

        let expected = Some("User_00042".to_string());
        assert_eq!(issue.author.as_ref().unwrap().name, expected);
        assert_eq!(issue.assigned_to.as_ref().unwrap().name, expected);
        assert_eq!(issue.journals()[0].user.as_ref().unwrap().name, expected);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(42).unwrap().original_name, "Alice");
        assert!(issue.author.as_ref().unwrap().extra.is_empty());
    }

    #[test]
    fn watcher_without_id_is_untouched() {
        let mut map = IdentityMap::new();
        let mut issue = issue_with_one_user_everywhere();
        map.anonymize_issue(&mut issue);

        let watchers = issue.watchers.as_ref().unwrap();
        assert_eq!(watchers[0].name.as_deref(), Some("User_00007"));
        assert_eq!(watchers[1].name.as_deref(), Some("Ghost"));
    }

    #[test]
    fn missing_name_is_recorded_as_unknown() {
        let mut map = IdentityMap::new();
        let anon = map.anonymize_user(&UserRef {
            id: Some(5),
            ..Default::default()
        });
        assert_eq!(anon.name.as_deref(), Some("User_00005"));
        assert_eq!(map.get(5).unwrap().original_name, "Unknown");
    }

    #[test]
    fn seeded_mapping_keeps_first_original_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mapping.json");

        let mut first = IdentityMap::new();
        first.anonymize_user(&UserRef::new(42, "Alice"));
        first.save(&path).unwrap();

        let raw: serde_json::Value = files::read_required_json(&path).unwrap();
        assert_eq!(raw["42"]["anonymous_name"], "User_00042");

        let mut second = IdentityMap::load(&path).unwrap();
        assert_eq!(second.seeded(), 1);
        second.anonymize_user(&UserRef::new(42, "Alice Renamed"));
        assert_eq!(second.get(42).unwrap().original_name, "Alice");
    }

    #[test]
    fn verification_flags_leaks() {
        let original = vec![issue_with_one_user_everywhere()];
        let mut anonymized = original.clone();
        let mut map = IdentityMap::new();
        map.anonymize_issue(&mut anonymized[0]);

        let report = verify(&original, &anonymized);
        assert!(report.is_clean());
        assert_eq!(report.unidentified, 1);
        assert_eq!(
            report.sample_author,
            Some(("Alice".to_string(), "User_00042".to_string()))
        );

        let report = verify(&original, &original);
        assert!(!report.is_clean());
        assert_eq!(report.leaked.len(), 4);
    }
}
