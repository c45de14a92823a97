// src/config/validate.rs

use globset::Glob;

use crate::config::model::{ConfigFile, PropertyConfig, RawConfigFile, TaskConfig};
use crate::errors::{CachedagError, Result};
use crate::fingerprint::PropertySpec;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CachedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.engine, raw.cache, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_engine_config(cfg)?;
    for (name, task) in &cfg.task {
        validate_task_references(cfg, name, task)?;
        validate_task_properties(name, task)?;
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(CachedagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.workers == Some(0) {
        return Err(CachedagError::ConfigError(
            "[engine].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_references(cfg: &RawConfigFile, name: &str, task: &TaskConfig) -> Result<()> {
    let lists = [
        ("after", &task.after),
        ("must_run_after", &task.must_run_after),
        ("should_run_after", &task.should_run_after),
        ("finalized_by", &task.finalized_by),
    ];
    for (field, deps) in lists {
        for dep in deps {
            if !cfg.task.contains_key(dep) {
                return Err(CachedagError::ConfigError(format!(
                    "task '{name}' has unknown task '{dep}' in `{field}`"
                )));
            }
            if dep == name {
                return Err(CachedagError::ConfigError(format!(
                    "task '{name}' cannot reference itself in `{field}`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_properties(name: &str, task: &TaskConfig) -> Result<()> {
    if task.cmd.trim().is_empty() {
        return Err(CachedagError::ConfigError(format!("task '{name}' has an empty `cmd`")));
    }

    for (prop, cfg) in &task.inputs {
        cfg.to_spec(prop)
            .map_err(|msg| property_error(name, "inputs", prop, &msg))?;
    }
    for (prop, cfg) in &task.outputs {
        let spec = cfg
            .to_spec(prop)
            .map_err(|msg| property_error(name, "outputs", prop, &msg))?;
        if !spec.is_location() {
            return Err(property_error(
                name,
                "outputs",
                prop,
                "outputs must be a `file` or a `tree`",
            ));
        }
    }
    Ok(())
}

fn property_error(task: &str, section: &str, prop: &str, msg: &str) -> CachedagError {
    CachedagError::ConfigError(format!("task '{task}' {section}.{prop}: {msg}"))
}

impl PropertyConfig {
    /// Turn the table into a property spec, rejecting ambiguous shapes.
    pub fn to_spec(&self, name: &str) -> std::result::Result<PropertySpec, String> {
        let set = [
            self.file.is_some(),
            self.tree.is_some(),
            self.value.is_some(),
            self.values.is_some(),
        ]
        .into_iter()
        .filter(|s| *s)
        .count();
        if set != 1 {
            return Err("exactly one of `file`, `tree`, `value` or `values` must be set".to_string());
        }

        if self.tree.is_none() && !(self.include.is_empty() && self.exclude.is_empty()) {
            return Err("`include` and `exclude` are only allowed with `tree`".to_string());
        }
        for pattern in self.include.iter().chain(&self.exclude) {
            Glob::new(pattern).map_err(|e| format!("invalid glob '{pattern}': {e}"))?;
        }

        let spec = if let Some(path) = &self.file {
            PropertySpec::file(name, path.clone())
        } else if let Some(root) = &self.tree {
            if self.include.is_empty() && self.exclude.is_empty() {
                PropertySpec::tree(name, root.clone())
            } else {
                PropertySpec::filtered_tree(name, root.clone(), self.include.clone(), self.exclude.clone())
            }
        } else if let Some(value) = &self.value {
            PropertySpec::value(name, value.clone())
        } else {
            PropertySpec::value_set(name, self.values.clone().unwrap_or_default())
        };
        Ok(spec)
    }
}
