use crate::bounding_box::{BoundingBoxWithLabels, Detection};
use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

// Ultralytics' default plotting palette.
const PALETTE: [(u32, u32, u32); 20] = [
    (255, 56, 56),
    (255, 157, 151),
    (255, 112, 31),
    (255, 178, 29),
    (207, 210, 49),
    (72, 249, 10),
    (146, 204, 23),
    (61, 219, 134),
    (26, 147, 52),
    (0, 212, 187),
    (44, 153, 168),
    (0, 194, 255),
    (52, 69, 147),
    (100, 115, 255),
    (0, 24, 236),
    (132, 56, 255),
    (82, 0, 133),
    (203, 56, 255),
    (255, 149, 200),
    (255, 55, 199),
];

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ClassLabels {
    class_labels: Vec<ColorLabel>,
}

impl ClassLabels {
    pub fn new(class_labels: Vec<ColorLabel>) -> Self {
        Self { class_labels }
    }

    /// Colours `names` (in class id order) with the default palette.
    pub fn from_names(names: Vec<String>) -> Self {
        let class_labels = names
            .into_iter()
            .enumerate()
            .map(|(class_id, label)| {
                let (red, green, blue) = PALETTE[class_id % PALETTE.len()];
                ColorLabel {
                    label,
                    red,
                    green,
                    blue,
                }
            })
            .collect();
        Self { class_labels }
    }

    /// A configured labels file wins over the class names embedded in the
    /// model; without either, classes render as `class <id>`.
    pub fn from_config(
        labels_cfg: Option<&LabelsConfig>,
        model_names: Option<Vec<String>>,
    ) -> Result<Self, LabelsError> {
        match (labels_cfg, model_names) {
            (Some(cfg), _) => {
                let class_labels = load_labels(&cfg.get_path())?;
                tracing::info!("Loaded {} class labels", class_labels.len());
                Ok(Self { class_labels })
            }
            (None, Some(names)) => {
                tracing::info!("Using {} class names from model metadata", names.len());
                Ok(Self::from_names(names))
            }
            (None, None) => {
                tracing::info!("No labels file configured, using class ids as labels");
                Ok(Self::default())
            }
        }
    }

    pub fn get(&self, class_id: u32) -> ColorLabel {
        if let Some(color_label) = self.class_labels.get(class_id as usize) {
            return color_label.clone();
        }
        let (red, green, blue) = PALETTE[class_id as usize % PALETTE.len()];
        ColorLabel {
            label: format!("class {}", class_id),
            red,
            green,
            blue,
        }
    }

    pub fn attach(&self, detections: &[Detection]) -> Vec<BoundingBoxWithLabels> {
        detections
            .iter()
            .map(|bbox| {
                let color_label = self.get(bbox.class_id);
                BoundingBoxWithLabels {
                    x1: bbox.x1,
                    y1: bbox.y1,
                    x2: bbox.x2,
                    y2: bbox.y2,
                    class_label: color_label.label,
                    red: color_label.red,
                    green: color_label.green,
                    blue: color_label.blue,
                    confidence: bbox.confidence,
                }
            })
            .collect()
    }
}

/// Reads a `label,red,green,blue` file, one class per line in class id order.
pub fn load_labels(filepath: &Path) -> Result<Vec<ColorLabel>, LabelsError> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut color_labels = Vec::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        color_labels.push(parse_line(&line, index + 1)?);
    }

    Ok(color_labels)
}

fn parse_line(line: &str, line_number: usize) -> Result<ColorLabel, LabelsError> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != 4 {
        return Err(LabelsError::InvalidLine {
            line: line_number,
            reason: format!("expected `label,red,green,blue`, got `{}`", line),
        });
    }

    let channel = |value: &str, name: &str| -> Result<u32, LabelsError> {
        value
            .trim()
            .parse::<u8>()
            .map(u32::from)
            .map_err(|_| LabelsError::InvalidLine {
                line: line_number,
                reason: format!("invalid {} value `{}`", name, value.trim()),
            })
    };

    Ok(ColorLabel {
        label: parts[0].trim().to_string(),
        red: channel(parts[1], "red")?,
        green: channel(parts[2], "green")?,
        blue: channel(parts[3], "blue")?,
    })
}

/// Parses the `names` entry Ultralytics writes into exported model metadata,
/// a Python dict literal such as `{0: 'person', 1: "driver's seat"}`.
///
/// Ids missing from the dict are filled with `class <id>`. Returns `None` when
/// the value is not a dict of integer keys to quoted strings.
pub fn parse_names_metadata(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut chars = body.chars().peekable();
    let mut entries: Vec<(usize, String)> = Vec::new();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
            key.push(c);
        }
        let class_id = key.parse::<usize>().ok()?;

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        chars.next_if_eq(&':')?;
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let quote = chars.next_if(|c| *c == '\'' || *c == '"')?;
        let mut name = String::new();
        loop {
            match chars.next()? {
                '\\' => name.push(chars.next()?),
                c if c == quote => break,
                c => name.push(c),
            }
        }
        entries.push((class_id, name));
    }

    let len = entries.iter().map(|(id, _)| id + 1).max().unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|id| format!("class {}", id)).collect();
    for (class_id, name) in entries {
        names[class_id] = name;
    }
    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_labels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "google, 66, 133, 244").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "apple,0,0,0").unwrap();

        let labels = load_labels(file.path()).unwrap();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].label, "google");
        assert_eq!((labels[0].red, labels[0].green, labels[0].blue), (66, 133, 244));
        assert_eq!(labels[1].label, "apple");
    }

    #[test]
    fn test_load_labels_rejects_malformed_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "google,66,133").unwrap();

        let err = load_labels(file.path()).unwrap_err();
        assert!(matches!(err, LabelsError::InvalidLine { line: 1, .. }));
    }

    #[test]
    fn test_load_labels_rejects_out_of_range_channel() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "google,300,0,0").unwrap();

        assert!(load_labels(file.path()).is_err());
    }

    #[test]
    fn test_unknown_class_falls_back_to_palette() {
        let labels = ClassLabels::new(vec![ColorLabel {
            label: "google".to_string(),
            red: 1,
            green: 2,
            blue: 3,
        }]);

        assert_eq!(labels.get(0).label, "google");
        let unknown = labels.get(21);
        assert_eq!(unknown.label, "class 21");
        assert_eq!((unknown.red, unknown.green, unknown.blue), PALETTE[1]);
    }

    #[test]
    fn test_parse_names_metadata() {
        let names = parse_names_metadata("{0: 'google', 1: 'apple', 2: 'meta'}").unwrap();

        assert_eq!(names, vec!["google", "apple", "meta"]);
    }

    #[test]
    fn test_parse_names_metadata_handles_quotes_and_gaps() {
        let names = parse_names_metadata(r#"{0: "driver's seat", 2: 'a \'b\' c'}"#).unwrap();

        assert_eq!(names, vec!["driver's seat", "class 1", "a 'b' c"]);
    }

    #[test]
    fn test_parse_names_metadata_rejects_other_shapes() {
        assert!(parse_names_metadata("['google', 'apple']").is_none());
        assert!(parse_names_metadata("{zero: 'google'}").is_none());
        assert!(parse_names_metadata("{0: 'unterminated}").is_none());
        assert_eq!(parse_names_metadata("{}"), Some(vec![]));
    }

    #[test]
    fn test_model_names_are_used_without_labels_file() {
        let names = vec!["google".to_string(), "apple".to_string()];

        let labels = ClassLabels::from_config(None, Some(names)).unwrap();

        assert_eq!(labels.get(1).label, "apple");
        let google = labels.get(0);
        assert_eq!((google.red, google.green, google.blue), PALETTE[0]);
        assert_eq!(labels.get(2).label, "class 2");
    }

    #[test]
    fn test_labels_file_overrides_model_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "google,66,133,244").unwrap();
        let cfg = LabelsConfig {
            labels_dir: file.path().parent().unwrap().to_path_buf(),
            labels_file: file
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
        };

        let labels = ClassLabels::from_config(Some(&cfg), Some(vec!["apple".to_string()])).unwrap();

        assert_eq!(labels.get(0).label, "google");
    }

    #[test]
    fn test_attach_keeps_geometry() {
        let labels = ClassLabels::default();
        let detections = [Detection {
            class_id: 3,
            confidence: 0.5,
            x1: 1.,
            y1: 2.,
            x2: 3.,
            y2: 4.,
        }];

        let labeled = labels.attach(&detections);

        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].class_label, "class 3");
        assert_eq!((labeled[0].x1, labeled[0].y2), (1., 4.));
        assert_eq!(labeled[0].confidence, 0.5);
    }
}
