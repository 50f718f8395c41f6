use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

const PLACEHOLDER_PATTERN: &str = r"\$\{([A-Za-z0-9_]+)\}";
const SYSTEM_TEMPLATES_DIR: &str = "/etc/stalewatch/templates";

/// Templates compiled into the binary, lowest priority.
pub const BUILTIN_TEMPLATES: [(&str, &str); 2] = [
    (
        "quiescent_assessment.yaml",
        include_str!("../../templates/quiescent_assessment.yaml"),
    ),
    (
        "ticket_quality_assessment.yaml",
        include_str!("../../templates/ticket_quality_assessment.yaml"),
    ),
];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error("template '{template}' is missing required variables: {}", .missing.join(", "))]
    MissingVariables {
        template: String,
        missing: Vec<String>,
    },
    #[error("invalid template in {origin}: {reason}")]
    InvalidTemplate { origin: String, reason: String },
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_pattern() -> Result<&'static Regex, PromptError> {
    if let Some(re) = PLACEHOLDER.get() {
        return Ok(re);
    }
    let re = Regex::new(PLACEHOLDER_PATTERN).map_err(|e| PromptError::InvalidTemplate {
        origin: "placeholder pattern".to_string(),
        reason: e.to_string(),
    })?;
    Ok(PLACEHOLDER.get_or_init(|| re))
}

/// A template record as stored on disk, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTemplateRecord {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_vars: Vec<String>,
    #[serde(default)]
    pub optional_vars: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    One(RawTemplateRecord),
    Many(Vec<RawTemplateRecord>),
}

impl TemplateFile {
    fn into_records(self) -> Vec<RawTemplateRecord> {
        match self {
            TemplateFile::One(record) => vec![record],
            TemplateFile::Many(records) => records,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub template: String,
    pub description: String,
    pub required_vars: BTreeSet<String>,
    pub optional_vars: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl PromptTemplate {
    /// Validate a record. Templates that declare no variables get every
    /// placeholder they contain as a required variable.
    pub fn from_record(record: RawTemplateRecord) -> Result<Self, PromptError> {
        if record.name.trim().is_empty() {
            return Err(PromptError::InvalidTemplate {
                origin: "template record".to_string(),
                reason: "name is empty".to_string(),
            });
        }

        let mut required_vars: BTreeSet<String> = record.required_vars.into_iter().collect();
        let optional_vars: BTreeSet<String> = record.optional_vars.into_iter().collect();
        if required_vars.is_empty() && optional_vars.is_empty() {
            required_vars = scan_placeholders(&record.template)?;
        }

        Ok(Self {
            name: record.name,
            template: record.template,
            description: record.description,
            required_vars,
            optional_vars,
            metadata: record.metadata,
        })
    }

    pub fn missing_variables(&self, vars: &HashMap<String, String>) -> Vec<String> {
        self.required_vars
            .iter()
            .filter(|name| !vars.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String, PromptError> {
        let missing = self.missing_variables(vars);
        if !missing.is_empty() {
            return Err(PromptError::MissingVariables {
                template: self.name.clone(),
                missing,
            });
        }

        let pattern = placeholder_pattern()?;
        let leftover: BTreeSet<&str> = pattern
            .captures_iter(&self.template)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|name| !vars.contains_key(*name))
            .collect();
        if !leftover.is_empty() {
            warn!(
                template = %self.name,
                leftover = ?leftover,
                "unresolved placeholders left in rendered prompt"
            );
        }

        let rendered = pattern.replace_all(&self.template, |caps: &regex::Captures| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(rendered.into_owned())
    }
}

pub fn scan_placeholders(template: &str) -> Result<BTreeSet<String>, PromptError> {
    Ok(placeholder_pattern()?
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect())
}

// ---------------------------------------------------------------------------
// Template sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Directory { label: &'static str, path: PathBuf },
    BuiltIn,
}

impl TemplateSource {
    pub fn describe(&self) -> String {
        match self {
            TemplateSource::Directory { label, path } => format!("{} ({})", label, path.display()),
            TemplateSource::BuiltIn => "built-in".to_string(),
        }
    }
}

/// Where templates come from, highest priority first.
pub trait TemplateStore {
    fn sources(&self) -> Vec<TemplateSource>;

    fn load_from(&self, source: &TemplateSource) -> Result<Vec<RawTemplateRecord>, PromptError>;
}

#[derive(Debug, Clone, Default)]
pub struct FsTemplateStore {
    user_dir: Option<PathBuf>,
    system_dir: Option<PathBuf>,
    extra_dir: Option<PathBuf>,
}

impl FsTemplateStore {
    /// User directory, `/etc/stalewatch/templates`, an optional extra
    /// directory, then the built-ins.
    pub fn standard(user_dir: Option<PathBuf>, extra_dir: Option<PathBuf>) -> Self {
        Self {
            user_dir,
            system_dir: Some(PathBuf::from(SYSTEM_TEMPLATES_DIR)),
            extra_dir,
        }
    }

    pub fn builtin_only() -> Self {
        Self::default()
    }

    pub fn with_dirs(user_dir: Option<PathBuf>, system_dir: Option<PathBuf>) -> Self {
        Self {
            user_dir,
            system_dir,
            extra_dir: None,
        }
    }
}

impl TemplateStore for FsTemplateStore {
    fn sources(&self) -> Vec<TemplateSource> {
        let candidates = [
            ("user", &self.user_dir),
            ("system", &self.system_dir),
            ("custom", &self.extra_dir),
        ];
        let mut sources: Vec<TemplateSource> = candidates
            .into_iter()
            .filter_map(|(label, dir)| dir.as_ref().map(|path| (label, path)))
            .filter(|(_, path)| path.is_dir())
            .map(|(label, path)| TemplateSource::Directory {
                label,
                path: path.clone(),
            })
            .collect();
        sources.push(TemplateSource::BuiltIn);
        sources
    }

    fn load_from(&self, source: &TemplateSource) -> Result<Vec<RawTemplateRecord>, PromptError> {
        match source {
            TemplateSource::Directory { path, .. } => load_directory(path),
            TemplateSource::BuiltIn => {
                let mut records = Vec::new();
                for (file_name, contents) in BUILTIN_TEMPLATES {
                    let file: TemplateFile = serde_yaml::from_str(contents).map_err(|e| {
                        PromptError::InvalidTemplate {
                            origin: format!("built-in {}", file_name),
                            reason: e.to_string(),
                        }
                    })?;
                    records.extend(file.into_records());
                }
                Ok(records)
            }
        }
    }
}

fn load_directory(dir: &Path) -> Result<Vec<RawTemplateRecord>, PromptError> {
    let io_err = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        match load_file(&path) {
            Ok(Some(mut loaded)) => records.append(&mut loaded),
            Ok(None) => {}
            // One broken file should not hide the rest of the directory.
            Err(e) => warn!(path = %path.display(), error = %e, "skipping template file"),
        }
    }
    Ok(records)
}

fn load_file(path: &Path) -> Result<Option<Vec<RawTemplateRecord>>, PromptError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    let Some(extension) = extension else {
        return Ok(None);
    };
    if !matches!(extension.as_str(), "yaml" | "yml" | "json" | "txt") {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |reason: String| PromptError::InvalidTemplate {
        origin: path.display().to_string(),
        reason,
    };

    let records = match extension.as_str() {
        "json" => serde_json::from_str::<TemplateFile>(&contents)
            .map_err(|e| invalid(e.to_string()))?
            .into_records(),
        "txt" => {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            vec![RawTemplateRecord {
                name,
                template: contents,
                ..RawTemplateRecord::default()
            }]
        }
        _ => serde_yaml::from_str::<TemplateFile>(&contents)
            .map_err(|e| invalid(e.to_string()))?
            .into_records(),
    };
    debug!(path = %path.display(), count = records.len(), "loaded template file");
    Ok(Some(records))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Named prompt templates merged from every source of a [`TemplateStore`].
///
/// Constructed once at start-up and passed by reference to whatever renders
/// prompts. `load` may be called again to pick up edited files.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    templates: BTreeMap<String, PromptTemplate>,
    origins: BTreeMap<String, String>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_store(store: &dyn TemplateStore) -> Result<Self, PromptError> {
        let mut registry = Self::new();
        registry.load(store)?;
        Ok(registry)
    }

    /// Replace the registry contents with a fresh load. Returns the template count.
    pub fn load(&mut self, store: &dyn TemplateStore) -> Result<usize, PromptError> {
        self.templates.clear();
        self.origins.clear();

        for source in store.sources() {
            let records = match store.load_from(&source) {
                Ok(records) => records,
                Err(e) if matches!(source, TemplateSource::Directory { .. }) => {
                    warn!(source = %source.describe(), error = %e, "skipping template source");
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Within one source the last definition of a name wins.
            let mut batch: BTreeMap<String, PromptTemplate> = BTreeMap::new();
            for record in records {
                match PromptTemplate::from_record(record) {
                    Ok(template) => {
                        batch.insert(template.name.clone(), template);
                    }
                    Err(e) => warn!(source = %source.describe(), error = %e, "skipping template"),
                }
            }

            // Across sources the first (highest priority) definition wins.
            for (name, template) in batch {
                if self.templates.contains_key(&name) {
                    debug!(template = %name, source = %source.describe(), "shadowed by higher priority source");
                    continue;
                }
                self.origins.insert(name.clone(), source.describe());
                self.templates.insert(name, template);
            }
        }

        debug!(count = self.templates.len(), "prompt templates loaded");
        Ok(self.templates.len())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate, PromptError> {
        self.templates
            .get(name)
            .ok_or_else(|| PromptError::TemplateNotFound(name.to_string()))
    }

    pub fn origin(&self, name: &str) -> Option<&str> {
        self.origins.get(name).map(String::as_str)
    }

    pub fn templates(&self) -> impl Iterator<Item = &PromptTemplate> {
        self.templates.values()
    }

    pub fn validate_variables(
        &self,
        name: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Vec<String>, PromptError> {
        Ok(self.get(name)?.missing_variables(vars))
    }

    pub fn render(&self, name: &str, vars: &HashMap<String, String>) -> Result<String, PromptError> {
        self.get(name)?.render(vars)
    }
}

/// Copy the built-in templates into `dest`. Existing files are kept unless
/// `force` is set. Returns the paths written.
pub fn install_builtin_templates(dest: &Path, force: bool) -> Result<Vec<PathBuf>, PromptError> {
    std::fs::create_dir_all(dest).map_err(|source| PromptError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut written = Vec::new();
    for (file_name, contents) in BUILTIN_TEMPLATES {
        let path = dest.join(file_name);
        if path.exists() && !force {
            debug!(path = %path.display(), "template exists, not overwriting");
            continue;
        }
        std::fs::write(&path, contents).map_err(|source| PromptError::Io {
            path: path.clone(),
            source,
        })?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn record(name: &str, template: &str) -> RawTemplateRecord {
        RawTemplateRecord {
            name: name.into(),
            template: template.into(),
            ..RawTemplateRecord::default()
        }
    }

    #[test]
    fn test_embedded_templates_are_non_empty() {
        for (file_name, contents) in BUILTIN_TEMPLATES {
            assert!(!contents.trim().is_empty(), "{} should not be empty", file_name);
        }
    }

    #[test]
    fn test_placeholders_become_required_when_undeclared() {
        let template = PromptTemplate::from_record(record("t", "Hi ${name}, today is ${date}.")).unwrap();
        let expected: BTreeSet<String> = ["date".to_string(), "name".to_string()].into();
        assert_eq!(template.required_vars, expected);
    }

    #[test]
    fn test_render_substitutes_and_is_repeatable() {
        let template = PromptTemplate::from_record(record("t", "Hi ${name}, ${name}!")).unwrap();
        let v = vars(&[("name", "Ann")]);
        let first = template.render(&v).unwrap();
        assert_eq!(first, "Hi Ann, Ann!");
        assert_eq!(template.render(&v).unwrap(), first);
    }

    #[test]
    fn test_missing_required_variable_is_an_error() {
        let template = PromptTemplate::from_record(record("t", "${a} and ${b}")).unwrap();
        match template.render(&vars(&[("a", "1")])) {
            Err(PromptError::MissingVariables { template, missing }) => {
                assert_eq!(template, "t");
                assert_eq!(missing, vec!["b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_optional_placeholders_are_left_in_place() {
        let template = PromptTemplate::from_record(RawTemplateRecord {
            required_vars: vec!["a".into()],
            optional_vars: vec!["b".into()],
            ..record("t", "${a} and ${b}")
        })
        .unwrap();
        assert_eq!(template.render(&vars(&[("a", "1")])).unwrap(), "1 and ${b}");
    }

    #[test]
    fn test_builtins_load_and_render() {
        let registry = PromptRegistry::from_store(&FsTemplateStore::builtin_only()).unwrap();
        assert!(registry.contains("quiescent_assessment"));
        assert!(registry.contains("ticket_quality_assessment"));
        assert_eq!(registry.origin("quiescent_assessment"), Some("built-in"));

        let v = vars(&[("current_date", "2026-01-02"), ("ticket_yaml", "key: DEMO-1")]);
        assert!(registry.validate_variables("quiescent_assessment", &v).unwrap().is_empty());
        let prompt = registry.render("quiescent_assessment", &v).unwrap();
        assert!(prompt.contains("Today is 2026-01-02."));
        assert!(prompt.contains("key: DEMO-1"));
        assert!(!prompt.contains("${"));
    }

    #[test]
    fn test_unknown_template_is_not_found() {
        let registry = PromptRegistry::new();
        assert!(matches!(
            registry.render("nope", &HashMap::new()),
            Err(PromptError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_user_directory_overrides_builtin() {
        let user = tempfile::tempdir().unwrap();
        std::fs::write(
            user.path().join("quiescent_assessment.yaml"),
            "name: quiescent_assessment\ntemplate: \"custom ${ticket_yaml}\"\n",
        )
        .unwrap();
        std::fs::write(user.path().join("greeting.txt"), "Hello ${who}").unwrap();
        std::fs::write(user.path().join("broken.yaml"), "name: [unterminated").unwrap();
        std::fs::write(user.path().join("notes.md"), "ignored").unwrap();

        let store = FsTemplateStore::with_dirs(Some(user.path().to_path_buf()), None);
        let registry = PromptRegistry::from_store(&store).unwrap();

        assert_eq!(
            registry.get("quiescent_assessment").unwrap().template,
            "custom ${ticket_yaml}"
        );
        assert!(registry.origin("quiescent_assessment").unwrap().starts_with("user"));
        assert_eq!(
            registry.render("greeting", &vars(&[("who", "you")])).unwrap(),
            "Hello you"
        );
        assert!(registry.contains("ticket_quality_assessment"));
        assert_eq!(registry.templates().count(), 3);
    }

    #[test]
    fn test_user_beats_system_and_last_duplicate_wins_within_source() {
        let user = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        std::fs::write(
            user.path().join("a.json"),
            r#"[{"name": "dup", "template": "first"}, {"name": "dup", "template": "second"}]"#,
        )
        .unwrap();
        std::fs::write(system.path().join("dup.txt"), "system").unwrap();

        let store = FsTemplateStore::with_dirs(
            Some(user.path().to_path_buf()),
            Some(system.path().to_path_buf()),
        );
        let registry = PromptRegistry::from_store(&store).unwrap();
        assert_eq!(registry.get("dup").unwrap().template, "second");
    }

    #[test]
    fn test_reload_picks_up_new_files() {
        let user = tempfile::tempdir().unwrap();
        let store = FsTemplateStore::with_dirs(Some(user.path().to_path_buf()), None);
        let mut registry = PromptRegistry::from_store(&store).unwrap();
        assert!(!registry.contains("late"));

        std::fs::write(user.path().join("late.txt"), "${x}").unwrap();
        assert_eq!(registry.load(&store).unwrap(), 3);
        assert!(registry.contains("late"));
    }

    #[test]
    fn test_install_respects_force() {
        let dest = tempfile::tempdir().unwrap();
        let written = install_builtin_templates(dest.path(), false).unwrap();
        assert_eq!(written.len(), BUILTIN_TEMPLATES.len());

        std::fs::write(dest.path().join("quiescent_assessment.yaml"), "edited").unwrap();
        assert!(install_builtin_templates(dest.path(), false).unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(dest.path().join("quiescent_assessment.yaml")).unwrap(),
            "edited"
        );
        assert_eq!(install_builtin_templates(dest.path(), true).unwrap().len(), 2);
    }
}
