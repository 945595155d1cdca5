//! Actions and the config that holds them.
//!
//! A config is a folder with a `config.json` plus the pattern images its
//! conditions and effects refer to. Each action is a set of conditions
//! that make it viable and the effects to run when it is chosen; successor
//! names link actions into chains.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::condition::{Condition, Evaluation};
use crate::effect::{Context, Effect};
use crate::error::{ConfigError, Result};
use crate::logger;
use crate::state::RunState;
use crate::types::{Frame, Size};
use crate::vision::{PatternStore, Vision};

pub const DOCUMENT_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub next_action_names: Vec<String>,
    /// Seconds to wait after applying.
    #[serde(default)]
    pub cooldown: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance_if_condition: Option<Condition>,
}

fn enabled() -> bool {
    true
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            effects: Vec::new(),
            is_enabled: true,
            next_action_names: Vec::new(),
            cooldown: 0.0,
            advance_if_condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn next(mut self, name: impl Into<String>) -> Self {
        self.next_action_names.push(name.into());
        self
    }

    pub fn cooldown(mut self, secs: f64) -> Self {
        self.cooldown = secs;
        self
    }

    pub fn advance_if(mut self, condition: Condition) -> Self {
        self.advance_if_condition = Some(condition);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    /// Weakest condition's score and box. Disabled actions and actions
    /// without conditions are never viable.
    pub fn viability(&self, scene: &Frame, state: &mut RunState, vision: &Vision) -> Result<Evaluation> {
        if !self.is_enabled || self.conditions.is_empty() {
            return Ok(Evaluation::NONE);
        }
        logger::debug_p("action", &format!("checking {}", self.name));
        let mut weakest: Option<Evaluation> = None;
        for condition in &self.conditions {
            let eval = condition.evaluate(scene, state, vision)?;
            if weakest.map_or(true, |w| eval.score < w.score) {
                weakest = Some(eval);
            }
        }
        let weakest = weakest.unwrap_or(Evaluation::NONE);
        logger::debug_p("action", &format!("{} scored {:.0}", self.name, weakest.score));
        Ok(weakest)
    }

    /// Every pattern image the action's conditions and effects read, in
    /// order, without repeats.
    pub fn pattern_paths(&self) -> Vec<&str> {
        let conditions = self.conditions.iter().chain(&self.advance_if_condition).map(|c| c.check().image_path.as_str());
        let effects = self.effects.iter().flat_map(Effect::pattern_paths);
        let mut paths: Vec<&str> = Vec::new();
        for path in conditions.chain(effects) {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    /// Run every effect in order.
    pub fn apply(&self, scene: &Frame, ctx: &mut Context) -> Result<()> {
        for effect in &self.effects {
            effect.apply(scene, ctx)?;
        }
        Ok(())
    }
}

/// The persisted form of a config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    #[serde(rename = "confirmAll", default)]
    pub confirm_all: bool,
    /// Capture size the patterns were recorded at.
    #[serde(default, deserialize_with = "size_or_false")]
    pub screenshot_size: Option<Size>,
    pub actions: Vec<Action>,
}

// Older documents wrote `false` for "unknown".
fn size_or_false<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Size>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Size(Size),
        Flag(bool),
    }
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Size(s)) => Some(s),
        _ => None,
    })
}

impl Document {
    pub fn empty(name: impl Into<String>) -> Self {
        Self { name: name.into(), confirm_all: false, screenshot_size: None, actions: Vec::new() }
    }

    /// Unique names; every successor exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for action in &self.actions {
            if !seen.insert(action.name.as_str()) {
                return Err(ConfigError::DuplicateAction(action.name.clone()));
            }
        }
        for action in &self.actions {
            if let Some(missing) = action.next_action_names.iter().find(|n| !seen.contains(n.as_str())) {
                return Err(ConfigError::UnknownAction {
                    name: missing.clone(),
                    referenced_by: Some(action.name.clone()),
                });
            }
        }
        Ok(())
    }

    /// Sorted keys, two-space indent.
    pub fn to_json(&self) -> Result<String> {
        // `Value` maps are ordered, which sorts the keys.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

pub struct Config {
    doc: Document,
    index: HashMap<String, usize>,
    folder: PathBuf,
    root: Option<PathBuf>,
    autosave: bool,
}

impl Config {
    /// Open `<root>/<name>`, creating an empty config there when allowed.
    pub fn open(root: &Path, name: &str, create_if_missing: bool) -> Result<Self> {
        let folder = root.join(name);
        if !folder.is_dir() {
            if !create_if_missing {
                return Err(ConfigError::Missing(folder).into());
            }
            std::fs::create_dir_all(&folder)?;
        }

        let path = folder.join(DOCUMENT_NAME);
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let doc: Document = serde_json::from_str(&text)
                .map_err(|source| ConfigError::Malformed { path: path.clone(), source })?;
            Self::from_document(doc, &folder)?
        } else {
            let config = Self::from_document(Document::empty(name), &folder)?;
            config.save()?;
            config
        };
        config.root = Some(root.to_path_buf());
        logger::info_p(
            "config",
            &format!("loaded {} ({} actions) from {}", config.name(), config.doc.actions.len(), folder.display()),
        );
        Ok(config)
    }

    /// Wrap an in-memory document whose images live in `folder`. Nothing is
    /// written until a mutation or [`Config::save`].
    pub fn from_document(doc: Document, folder: &Path) -> Result<Self> {
        doc.validate()?;
        let index = doc.actions.iter().enumerate().map(|(i, a)| (a.name.clone(), i)).collect();
        Ok(Self { doc, index, folder: folder.to_path_buf(), root: None, autosave: true })
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn actions(&self) -> &[Action] {
        &self.doc.actions
    }

    pub fn names(&self) -> Vec<String> {
        self.doc.actions.iter().map(|a| a.name.clone()).collect()
    }

    pub fn confirm_all(&self) -> bool {
        self.doc.confirm_all
    }

    pub fn set_confirm_all(&mut self, confirm: bool) -> Result<()> {
        self.doc.confirm_all = confirm;
        self.autosave()
    }

    pub fn screenshot_size(&self) -> Option<Size> {
        self.doc.screenshot_size
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn json_path(&self) -> PathBuf {
        self.folder.join(DOCUMENT_NAME)
    }

    /// Store resolving this config's pattern paths.
    pub fn pattern_store(&self) -> PatternStore {
        let store = PatternStore::new(&self.folder);
        match &self.root {
            Some(root) => store.with_root(root),
            None => store,
        }
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.index.get(name).map(|&i| &self.doc.actions[i])
    }

    pub fn get_action(&self, name: &str) -> Result<&Action, ConfigError> {
        self.action(name).ok_or_else(|| ConfigError::UnknownAction { name: name.to_string(), referenced_by: None })
    }

    pub fn add_action(&mut self, action: Action) -> Result<()> {
        if self.index.contains_key(&action.name) {
            return Err(ConfigError::DuplicateAction(action.name).into());
        }
        self.index.insert(action.name.clone(), self.doc.actions.len());
        self.doc.actions.push(action);
        self.autosave()
    }

    /// Remove `name` and drop it from every successor list.
    pub fn remove_action(&mut self, name: &str) -> Result<Action> {
        let i = *self.index.get(name).ok_or_else(|| ConfigError::UnknownAction {
            name: name.to_string(),
            referenced_by: None,
        })?;
        let removed = self.doc.actions.remove(i);
        for action in &mut self.doc.actions {
            action.next_action_names.retain(|n| n != name);
        }
        self.reindex();
        self.autosave()?;
        Ok(removed)
    }

    /// Swap in a new definition for the action with the same name.
    pub fn replace_action(&mut self, action: Action) -> Result<Action> {
        let i = *self.index.get(&action.name).ok_or_else(|| ConfigError::UnknownAction {
            name: action.name.clone(),
            referenced_by: None,
        })?;
        let old = std::mem::replace(&mut self.doc.actions[i], action);
        self.autosave()?;
        Ok(old)
    }

    /// Run several mutations with a single write at the end.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let autosave = std::mem::replace(&mut self.autosave, false);
        let out = f(self);
        self.autosave = autosave;
        let out = out?;
        self.autosave()?;
        Ok(out)
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.folder)?;
        std::fs::write(self.json_path(), self.doc.to_json()?)?;
        Ok(())
    }

    fn autosave(&self) -> Result<()> {
        if self.autosave {
            self.save()?;
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self.doc.actions.iter().enumerate().map(|(i, a)| (a.name.clone(), i)).collect();
    }
}
