use anyhow::{anyhow, Result};
use std::path::Path;

/// Alias table for class-name files. Model files were trained with mixed Spanish/English names.
const ALIASES: &[(&str, &str)] = &[
    ("persona", "person"),
    ("perro", "dog"),
    ("bicicleta", "bicycle"),
    ("auto", "car"),
    ("moto", "motorcycle"),
    ("puerta", "door"),
    ("escalera", "stairs"),
    ("escalera_mecanica", "escalator"),
    ("semaforo", "traffic_light"),
    ("semáforo", "traffic_light"),
    ("traffic light", "traffic_light"),
    ("arbol", "tree"),
    ("árbol", "tree"),
];

/// Map a raw class name to its canonical label. Unknown names pass through trimmed.
pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Class-id to label table loaded from a `.names` file (one class per line).
#[derive(Clone, Debug, Default)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read class names {}: {}", path.display(), e))?;
        let names = Self::parse(&String::from_utf8_lossy(&raw));
        if names.is_empty() {
            return Err(anyhow!("class names file {} is empty", path.display()));
        }
        Ok(names)
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            names: raw
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(normalize_label)
                .collect(),
        }
    }

    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanish_names_are_normalized() {
        assert_eq!(normalize_label("persona"), "person");
        assert_eq!(normalize_label(" semaforo "), "traffic_light");
        assert_eq!(normalize_label("traffic light"), "traffic_light");
        assert_eq!(normalize_label("escalera_mecanica"), "escalator");
        assert_eq!(normalize_label("kiosk"), "kiosk");
    }

    #[test]
    fn names_file_skips_blank_lines() {
        let names = ClassNames::parse("persona\n\npuerta\r\nsemáforo\n");
        assert_eq!(names.len(), 3);
        assert_eq!(names.label(0), Some("person"));
        assert_eq!(names.label(1), Some("door"));
        assert_eq!(names.label(2), Some("traffic_light"));
        assert_eq!(names.label(3), None);
    }
}
