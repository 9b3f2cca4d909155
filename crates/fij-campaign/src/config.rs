//! Campaign configuration: the JSON document a campaign run is driven
//! from, expanded into a flat list of [`Job`]s.
//!
//! Grounded on `fij_runner/fij_config.cpp`'s `build_fij_jobs_from_config`:
//! `{base_path}` substitution into paths/args, a shallow `defaults` →
//! per-target `defaults` → per-variant override merge, and the same
//! boolean-coercion rules (`bool_int`'s "1"/"true"/"yes"/"on" acceptance)
//! for the `only_mem`/`no_injection`/`all_threads` fields.

use std::{fs, path::Path};

use fij_core::{Architecture, FijError, InjectionPolicy};
use serde::Deserialize;
use serde_json::Value;

/// The top-level campaign configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignConfig {
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub defaults: Value,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_workers() -> usize {
    1
}

/// One target executable and its argument variants.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub path: String,
    #[serde(default)]
    pub defaults: Value,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// One expanded unit of work: a target, its argument template, and the
/// fully-resolved policy/run counts for this variant.
#[derive(Debug, Clone)]
pub struct Job {
    pub path: String,
    pub args_template: String,
    pub runs: u32,
    pub baseline_runs: u32,
    pub policy: InjectionPolicy,
    pub workers: usize,
}

/// Loads and parses a campaign configuration file, stripping `//` line
/// comments the way the original JSON loader does (plain `json::parse`
/// rejects them otherwise).
pub fn load(path: &Path) -> Result<CampaignConfig, FijError> {
    let raw = fs::read_to_string(path)?;
    let stripped: String = raw
        .lines()
        .map(|line| match line.find("//") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");
    serde_json::from_str(&stripped).map_err(|_| FijError::InvalidArgument("malformed campaign config"))
}

/// Expands a [`CampaignConfig`] into one [`Job`] per target/argument
/// variant, substituting `{base_path}` into paths and argument templates
/// and resolving any `reg` field through architecture `A`'s register
/// names.
pub fn build_jobs<A: Architecture>(config: &CampaignConfig) -> Result<Vec<Job>, FijError> {
    let mut jobs = Vec::new();

    for target in &config.targets {
        let path = substitute_base_path(&target.path, &config.base_path);

        let variants: Vec<Value> = if target.args.is_empty() {
            vec![Value::Object(Default::default())]
        } else {
            target.args.clone()
        };

        for variant in &variants {
            let merged = merge_json(&merge_json(&config.defaults, &target.defaults), variant);
            let runs = field_u32(&merged, "runs", 1);
            if runs == 0 {
                continue;
            }
            let baseline_runs = field_u32(&merged, "baseline_runs", 3).max(3);

            let args_template = field_str(&merged, "value").or_else(|| field_str(&merged, "args")).unwrap_or_default();
            let args_template = substitute_base_path(&args_template, &config.base_path);

            let policy = build_policy::<A>(&merged)?;

            jobs.push(Job {
                path: path.clone(),
                args_template,
                runs,
                baseline_runs,
                policy,
                workers: config.workers.max(1),
            });
        }
    }

    Ok(jobs)
}

fn build_policy<A: Architecture>(merged: &Value) -> Result<InjectionPolicy, FijError> {
    let target_reg = match field_str(merged, "reg") {
        Some(name) => Some(
            A::register_id_by_name(&name)
                .ok_or(FijError::InvalidArgument("unknown register name for this architecture"))?,
        ),
        None => None,
    };

    let reg_bit = field_i64(merged, "bit").map(|v| v.clamp(0, 63) as u8);

    let target_pc = match merged.get("pc") {
        Some(Value::String(s)) => Some(parse_c_int(s)?),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };

    Ok(InjectionPolicy {
        weight_mem: field_u32(merged, "weight_mem", 0),
        only_mem: field_bool(merged, "only_mem"),
        target_reg,
        reg_bit,
        target_pc,
        min_delay_ms: field_u32(merged, "min_delay_ms", 0) as u64,
        max_delay_ms: field_u32(merged, "max_delay_ms", 0) as u64,
        thread_index: field_i64(merged, "thread").map(|v| v.max(0) as usize),
        all_threads: field_bool(merged, "all_threads"),
        process_index: field_i64(merged, "nprocess").map(|v| v.max(0) as usize),
        no_injection: field_bool(merged, "no_injection"),
    })
}

/// Shallow key-wise override: `overlay`'s top-level keys replace `base`'s,
/// matching the original's `target_defaults[it.key()] = it.value()` loop
/// rather than a recursive deep merge.
fn merge_json(base: &Value, overlay: &Value) -> Value {
    let mut out = match base {
        Value::Object(map) => map.clone(),
        _ => Default::default(),
    };
    if let Value::Object(map) = overlay {
        for (key, value) in map {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn substitute_base_path(s: &str, base_path: &str) -> String {
    if base_path.is_empty() {
        s.to_string()
    } else {
        s.replace("{base_path}", base_path)
    }
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn field_u32(value: &Value, key: &str, default: u32) -> u32 {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32).unwrap_or(default)
}

fn field_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

/// `bool_int`'s coercion: booleans and non-zero numbers are truthy;
/// strings accept `"1"`/`"true"`/`"yes"`/`"on"` case-insensitively.
fn field_bool(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        _ => false,
    }
}

/// Parses a C-style integer literal (`0x`-prefixed hex, `0`-prefixed octal,
/// or decimal), matching `std::stoi(v, nullptr, 0)`'s base-detection.
fn parse_c_int(s: &str) -> Result<u64, FijError> {
    let s = s.trim();
    let err = || FijError::InvalidArgument("malformed pc value");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| err())
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8).map_err(|_| err())
    } else {
        s.parse::<u64>().map_err(|_| err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_merge_overrides_only_top_level_keys() {
        let base = serde_json::json!({"a": 1, "b": 2});
        let overlay = serde_json::json!({"b": 3, "c": 4});
        let merged = merge_json(&base, &overlay);
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn field_bool_accepts_string_truthy_values() {
        let v = serde_json::json!({"only_mem": "yes"});
        assert!(field_bool(&v, "only_mem"));
        let v = serde_json::json!({"only_mem": "no"});
        assert!(!field_bool(&v, "only_mem"));
    }

    #[test]
    fn parse_c_int_accepts_hex_and_decimal() {
        assert_eq!(parse_c_int("0x10").unwrap(), 16);
        assert_eq!(parse_c_int("16").unwrap(), 16);
    }

    #[test]
    fn base_path_placeholder_is_substituted() {
        assert_eq!(substitute_base_path("{base_path}/bin/x", "/opt"), "/opt/bin/x");
    }
}
