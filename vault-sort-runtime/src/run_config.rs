//! Run configuration loader and the data tables the run consults.

use crate::interfaces::RuntimeError;
use deunicode::deunicode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vault_sort::infra::CooldownPolicy;
use vault_sort_tools::{DestinationRoot, SnapshotLimits};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Folders whose top-level entries are moved into INBOX at start.
    pub roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub url: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub n_predict_probe: u32,
    pub n_predict_decide: u32,
    /// Sent on the first attempt only.
    pub stop: Vec<String>,
    /// Prompt length the final attempt is cut to.
    pub max_prompt_chars: usize,
    /// How long `run --wait-oracle` polls for the endpoint.
    pub wait_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/completion".to_string(),
            request_timeout_secs: 180,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 8000,
            n_predict_probe: 64,
            n_predict_decide: 256,
            stop: ["</s>", "\n\n", "\nOBSERVATION:", "\nRECENT_TOOL_OBS:"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_prompt_chars: 12_000,
            wait_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeDepths {
    pub documents: usize,
    pub media: usize,
    pub projects: usize,
}

impl TreeDepths {
    pub fn for_root(&self, root: DestinationRoot) -> usize {
        match root {
            DestinationRoot::Documents => self.documents,
            DestinationRoot::Media => self.media,
            DestinationRoot::Projects => self.projects,
        }
    }
}

impl Default for TreeDepths {
    fn default() -> Self {
        Self {
            documents: 3,
            media: 2,
            projects: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_steps: u64,
    pub mem_limit: usize,
    pub inspect_cap_per_file: u32,
    pub list_cap_per_dir: u32,
    pub tool_timeout_ms: u64,
    pub snapshot: SnapshotLimits,
    pub tree_depth: TreeDepths,
    /// Children kept per node of a destination tree.
    pub tree_dir_cap: usize,
    /// Steps a cached destination tree stays valid without a move.
    pub tree_ttl_steps: u64,
    /// Directory names that mark a dependency or build tree. Such trees are
    /// never expanded and never become targets on their own.
    pub dependency_dirs: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            mem_limit: 8,
            inspect_cap_per_file: 2,
            list_cap_per_dir: 1,
            tool_timeout_ms: 30_000,
            snapshot: SnapshotLimits::default(),
            tree_depth: TreeDepths::default(),
            tree_dir_cap: 40,
            tree_ttl_steps: 10,
            dependency_dirs: [
                "node_modules",
                "bower_components",
                "vendor",
                ".venv",
                "venv",
                ".pip",
                ".mypy_cache",
                ".git",
                ".svn",
                ".hg",
                "build",
                "dist",
                "target",
                ".next",
                ".cache",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_ms: 2000,
            factor: 2,
            max_delay_ms: 60_000,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationsConfig {
    /// `Root/*` needs at least one subfolder, a bare `Root` allows none.
    pub allowed: Vec<String>,
    /// Require the first subfolder to be a taxonomy category.
    pub enforce_taxonomy: bool,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            allowed: vec!["Documents/*".into(), "Media/*".into(), "Projects".into()],
            enforce_taxonomy: false,
        }
    }
}

/// Known categories per destination root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    #[serde(rename = "Documents")]
    pub documents: Vec<String>,
    #[serde(rename = "Media")]
    pub media: Vec<String>,
    #[serde(rename = "Projects")]
    pub projects: Vec<String>,
}

impl Taxonomy {
    pub fn categories(&self, root: DestinationRoot) -> &[String] {
        match root {
            DestinationRoot::Documents => &self.documents,
            DestinationRoot::Media => &self.media,
            DestinationRoot::Projects => &self.projects,
        }
    }

    /// Canonical spelling of `segment` if it names a category of `root`.
    pub fn canonical(&self, root: DestinationRoot, segment: &str) -> Option<&str> {
        let key = fold(segment);
        self.categories(root)
            .iter()
            .find(|c| fold(c) == key)
            .map(|c| c.as_str())
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        let owned =
            |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            documents: owned(&[
                "Identity",
                "Legal",
                "Finance",
                "Housing",
                "Health",
                "Education",
                "Employment",
                "Travel",
                "Family",
            ]),
            media: owned(&["Movies", "Series", "Music", "Images"]),
            projects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub label: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeopleTable {
    pub people: Vec<Person>,
}

impl PeopleTable {
    /// First person with a pattern occurring in `text`, compared
    /// case- and accent-insensitively.
    pub fn match_label(&self, text: &str) -> Option<&str> {
        let haystack = fold(text);
        if haystack.is_empty() {
            return None;
        }
        self.people
            .iter()
            .find(|person| {
                person
                    .patterns
                    .iter()
                    .map(|p| fold(p))
                    .any(|p| !p.is_empty() && haystack.contains(&p))
            })
            .map(|person| person.label.as_str())
    }

    /// Whether a folder name is exactly a person's label or one of their patterns.
    pub fn is_owner_name(&self, name: &str) -> bool {
        let key = fold(name);
        !key.is_empty()
            && self
                .people
                .iter()
                .any(|p| fold(&p.label) == key || p.patterns.iter().any(|pat| fold(pat) == key))
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

fn fold(text: &str) -> String {
    deunicode(text).trim().to_lowercase()
}

/// Draining-phase restructuring of leftover inbox folders.
///
/// A directory below INBOX whose only visible entry is one directory `C` is
/// an ambiguous wrapper: `C` is hoisted next to it and the wrapper removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenRule {
    pub enabled: bool,
    /// Only flatten wrappers named after a known person.
    pub require_owner_label: bool,
    /// Leave `Owner/2023` style wrappers alone.
    pub preserve_year_dirs: bool,
    pub year_dir_regex: String,
    /// Each pass can resolve one more level of a nested chain.
    pub max_passes: usize,
}

impl Default for FlattenRule {
    fn default() -> Self {
        Self {
            enabled: true,
            require_owner_label: true,
            preserve_year_dirs: true,
            year_dir_regex: r"^(19|20)\d{2}$".to_string(),
            max_passes: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub flatten: FlattenRule,
    pub remove_empty_dirs: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            flatten: FlattenRule::default(),
            remove_empty_dirs: true,
        }
    }
}

/// When sibling files vote for one destination, move their folder instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohesionConfig {
    pub enabled: bool,
    /// Planned file moves needed before a folder can escalate.
    pub min_votes: usize,
    /// Share of votes the leading destination must hold.
    pub purity_min: f64,
    /// Extension mix entropy, in bits, above which the folder is too varied.
    pub max_ext_entropy: f64,
    /// Folders with more visible entries are never moved whole.
    pub max_children: usize,
}

impl Default for CohesionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_votes: 3,
            purity_min: 0.8,
            max_ext_entropy: 1.0,
            max_children: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Defaults to `<vault>/.vault-sort/logs`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub vault: VaultConfig,
    pub intake: IntakeConfig,
    pub oracle: OracleConfig,
    pub limits: LimitsConfig,
    pub cooldown: CooldownConfig,
    pub destinations: DestinationsConfig,
    pub taxonomy: Taxonomy,
    pub people: PeopleTable,
    pub cleanup: CleanupConfig,
    pub cohesion: CohesionConfig,
    pub audit: AuditConfig,
    pub dry_run: bool,
}

impl RunConfig {
    /// Read and parse a YAML run configuration. Callers validate once their
    /// overrides are applied.
    pub fn read_file(config_path: &Path) -> Result<Self, RuntimeError> {
        if !config_path.exists() {
            return Err(RuntimeError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        if content.trim().is_empty() {
            return Err(RuntimeError::ConfigError("Config file is empty".to_string()));
        }

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, RuntimeError> {
        serde_yaml::from_str(content)
            .map_err(|e| RuntimeError::ConfigError(format!("Invalid YAML: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, RuntimeError> {
        serde_yaml::to_string(self)
            .map_err(|e| RuntimeError::ConfigError(format!("Cannot serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        let fail = |msg: &str| Err(RuntimeError::ConfigError(msg.to_string()));

        if self.vault.root.as_os_str().is_empty() {
            return fail("Config missing required field: vault.root");
        }
        if self.limits.max_steps == 0 {
            return fail("limits.max_steps must be at least 1");
        }
        if self.limits.mem_limit == 0 {
            return fail("limits.mem_limit must be at least 1");
        }
        if self.oracle.max_attempts == 0 {
            return fail("oracle.max_attempts must be at least 1");
        }
        if self.oracle.request_timeout_secs == 0 {
            return fail("oracle.request_timeout_secs must be at least 1");
        }
        if self.oracle.backoff_base_ms > self.oracle.backoff_max_ms {
            return fail("oracle.backoff_base_ms exceeds oracle.backoff_max_ms");
        }
        if self.cooldown.max_attempts == 0 {
            return fail("cooldown.max_attempts must be at least 1");
        }
        if self.cooldown.base_ms > self.cooldown.max_delay_ms {
            return fail("cooldown.base_ms exceeds cooldown.max_delay_ms");
        }
        if self.cohesion.min_votes < 2 {
            return fail("cohesion.min_votes must be at least 2");
        }
        if !(self.cohesion.purity_min > 0.0 && self.cohesion.purity_min <= 1.0) {
            return fail("cohesion.purity_min must be in (0, 1]");
        }
        if self.cohesion.max_ext_entropy < 0.0 {
            return fail("cohesion.max_ext_entropy must not be negative");
        }
        reqwest::Url::parse(&self.oracle.url)
            .map_err(|e| RuntimeError::ConfigError(format!("Invalid oracle.url: {}", e)))?;
        self.destination_policy()?;
        self.year_dir_regex()?;
        Ok(())
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy::new(
            Duration::from_millis(self.cooldown.base_ms),
            self.cooldown.factor,
            Duration::from_millis(self.cooldown.max_delay_ms),
            self.cooldown.max_attempts,
        )
    }

    pub fn destination_policy(&self) -> Result<DestinationPolicy, RuntimeError> {
        DestinationPolicy::parse(&self.destinations.allowed)
    }

    pub fn year_dir_regex(&self) -> Result<Regex, RuntimeError> {
        Regex::new(&self.cleanup.flatten.year_dir_regex).map_err(|e| {
            RuntimeError::ConfigError(format!("Invalid cleanup.flatten.year_dir_regex: {}", e))
        })
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.audit
            .dir
            .clone()
            .unwrap_or_else(|| self.vault.root.join(".vault-sort").join("logs"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationPattern {
    pub root: DestinationRoot,
    pub requires_subfolder: bool,
}

/// Parsed `destinations.allowed` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPolicy {
    patterns: Vec<DestinationPattern>,
}

impl DestinationPolicy {
    pub fn parse(patterns: &[String]) -> Result<Self, RuntimeError> {
        if patterns.is_empty() {
            return Err(RuntimeError::ConfigError(
                "destinations.allowed is empty".to_string(),
            ));
        }

        let mut parsed: Vec<DestinationPattern> = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.trim();
            let (head, requires_subfolder) = match raw.strip_suffix("/*") {
                Some(head) => (head, true),
                None => (raw, false),
            };
            if head.contains('/') || head.contains('*') {
                return Err(RuntimeError::ConfigError(format!(
                    "Malformed destination pattern: {}",
                    raw
                )));
            }
            let root = DestinationRoot::from_alias(head).ok_or_else(|| {
                RuntimeError::ConfigError(format!("Unknown destination root: {}", raw))
            })?;
            if parsed.iter().any(|p| p.root == root) {
                return Err(RuntimeError::ConfigError(format!(
                    "Destination root listed twice: {}",
                    root
                )));
            }
            parsed.push(DestinationPattern {
                root,
                requires_subfolder,
            });
        }
        Ok(Self { patterns: parsed })
    }

    pub fn get(&self, root: DestinationRoot) -> Option<DestinationPattern> {
        self.patterns.iter().copied().find(|p| p.root == root)
    }

    pub fn roots(&self) -> Vec<DestinationRoot> {
        self.patterns.iter().map(|p| p.root).collect()
    }

    /// `Documents/*, Media/*, Projects` style rendering for prompts.
    pub fn describe(&self) -> String {
        self.patterns
            .iter()
            .map(|p| {
                if p.requires_subfolder {
                    format!("{}/*", p.root)
                } else {
                    p.root.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal() -> RunConfig {
        let mut config = RunConfig::default();
        config.vault.root = PathBuf::from("/srv/vault");
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = minimal();
        config.validate().unwrap();
        assert_eq!(config.limits.max_steps, 500);
        assert_eq!(config.limits.mem_limit, 8);
        assert_eq!(config.oracle.stop.len(), 4);
        assert_eq!(config.audit_dir(), PathBuf::from("/srv/vault/.vault-sort/logs"));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
vault:
  root: /srv/vault
limits:
  max_steps: 20
people:
  people:
    - label: Alice
      patterns: [alice, "a. martin"]
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.limits.max_steps, 20);
        assert_eq!(config.limits.inspect_cap_per_file, 2);
        assert_eq!(config.people.people[0].label, "Alice");
        assert_eq!(config.taxonomy.media.len(), 4);
        assert_eq!(config.cohesion.min_votes, 3);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = minimal();
        let back = RunConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validation_failures() {
        assert!(RunConfig::default().validate().is_err());

        let mut config = minimal();
        config.limits.max_steps = 0;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.oracle.backoff_base_ms = 10_000;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.cleanup.flatten.year_dir_regex = "(".into();
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.destinations.allowed = vec!["Downloads/*".into()];
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.cohesion.purity_min = 1.5;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.cohesion.min_votes = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_errors() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.yaml");
        let err = RunConfig::read_file(&missing).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let empty = temp.path().join("empty.yaml");
        std::fs::write(&empty, "  \n").unwrap();
        let err = RunConfig::read_file(&empty).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let bad = temp.path().join("bad.yaml");
        std::fs::write(&bad, "limits: [1, 2").unwrap();
        let err = RunConfig::read_file(&bad).unwrap_err();
        assert!(err.to_string().contains("Invalid YAML"));
    }

    #[test]
    fn test_destination_policy_parse() {
        let policy = DestinationPolicy::parse(&[
            "Documents/*".to_string(),
            "media/*".to_string(),
            "Projects".to_string(),
        ])
        .unwrap();
        assert!(policy.get(DestinationRoot::Documents).unwrap().requires_subfolder);
        assert!(!policy.get(DestinationRoot::Projects).unwrap().requires_subfolder);
        assert_eq!(policy.describe(), "Documents/*, Media/*, Projects");

        assert!(DestinationPolicy::parse(&["Documents/Finance".to_string()]).is_err());
        assert!(DestinationPolicy::parse(&["Media".into(), "Media/*".into()]).is_err());
        assert!(DestinationPolicy::parse(&[]).is_err());
    }

    #[test]
    fn test_people_matching() {
        let people = PeopleTable {
            people: vec![
                Person {
                    label: "Zoé".into(),
                    patterns: vec!["zoe".into(), "z. durand".into()],
                },
                Person {
                    label: "Marc".into(),
                    patterns: vec!["marc".into()],
                },
            ],
        };

        assert_eq!(people.match_label("Passeport_ZOÉ_2021.pdf"), Some("Zoé"));
        assert_eq!(people.match_label("contract signed by Z. Durand"), Some("Zoé"));
        assert_eq!(people.match_label("invoice.pdf"), None);
        assert!(people.is_owner_name("MARC"));
        assert!(!people.is_owner_name("Marcus"));
    }

    #[test]
    fn test_taxonomy_canonical_spelling() {
        let taxonomy = Taxonomy::default();
        assert_eq!(
            taxonomy.canonical(DestinationRoot::Documents, "finance"),
            Some("Finance")
        );
        assert_eq!(taxonomy.canonical(DestinationRoot::Media, "Finance"), None);
        assert!(taxonomy.categories(DestinationRoot::Projects).is_empty());
    }
}
