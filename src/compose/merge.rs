//! Deep merge of YAML documents.
//!
//! Used for `.ddev/config.*.yaml` overrides and `.ddev/docker-compose.*.yaml`
//! overlays. Mappings merge key by key, sequences append the items not
//! already present, anything else is replaced by the overlay.

use serde_yaml::Value;

pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            for item in overlay_seq {
                if !base_seq.contains(&item) {
                    base_seq.push(item);
                }
            }
        }
        // `key: ~` in an overlay leaves the base alone.
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn mappings_merge_recursively() {
        let mut base = yaml("services:\n  web:\n    image: a\n    environment: [X=1]\n");
        merge_values(
            &mut base,
            yaml("services:\n  web:\n    image: b\n    environment: [X=1, Y=2]\n  redis:\n    image: redis:7\n"),
        );
        assert_eq!(
            base,
            yaml("services:\n  web:\n    image: b\n    environment: [X=1, Y=2]\n  redis:\n    image: redis:7\n")
        );
    }

    #[test]
    fn null_overlay_is_ignored() {
        let mut base = yaml("php_version: '8.2'\n");
        merge_values(&mut base, yaml("php_version: ~\n"));
        assert_eq!(base, yaml("php_version: '8.2'\n"));
    }

    #[test]
    fn scalar_replaces() {
        let mut base = yaml("a: 1\n");
        merge_values(&mut base, yaml("a: [1]\n"));
        assert_eq!(base, yaml("a: [1]\n"));
    }
}
