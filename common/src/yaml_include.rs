use std::error::Error;
use std::fs;
use std::path::Path;
use yaml_rust2::{Yaml, YamlLoader};

/// Load a YAML file, resolving `!include other.yaml` lines recursively.
///
/// Included documents are merged first, in order, and the including
/// file's own keys win over anything it pulled in. Hashes merge key by
/// key; any other value is replaced outright.
pub fn load_yaml_with_includes(path: &Path) -> Result<Yaml, Box<dyn Error + Send + Sync>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let base_dir = path.parent().unwrap_or(Path::new(""));

    let (include_lines, rest): (Vec<&str>, Vec<&str>) = contents
        .lines()
        .partition(|line| line.trim_start().starts_with("!include"));

    let mut merged = Yaml::Hash(Default::default());
    for line in include_lines {
        let target = line
            .trim_start()
            .strip_prefix("!include")
            .unwrap_or("")
            .trim();
        if target.is_empty() {
            return Err(format!("empty !include directive in {}", path.display()).into());
        }
        let included = load_yaml_with_includes(&base_dir.join(target))?;
        merged = merge_yaml(&merged, &included);
    }

    for doc in YamlLoader::load_from_str(&rest.join("\n"))? {
        merged = merge_yaml(&merged, &doc);
    }

    Ok(merged)
}

fn merge_yaml(base: &Yaml, overlay: &Yaml) -> Yaml {
    match (base, overlay) {
        (Yaml::Hash(base_hash), Yaml::Hash(overlay_hash)) => {
            let mut result = base_hash.clone();
            for (key, value) in overlay_hash {
                let merged = match base_hash.get(key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Yaml::Hash(result)
        }
        (_, overlay_value) => overlay_value.clone(),
    }
}
