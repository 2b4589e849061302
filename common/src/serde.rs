use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::file_format::{FileFormat, FileFormatError};

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error(transparent)]
    Format(#[from] FileFormatError),
    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

pub fn serialize<T: Serialize>(value: &T, format: FileFormat) -> SerdeFormatResult<String> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::to_string(value)?),
        FileFormat::Json => Ok(serde_json::to_string_pretty(value)?),
    }
}

pub fn deserialize<T: DeserializeOwned>(
    serialized: &str,
    format: FileFormat,
) -> SerdeFormatResult<T> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        FileFormat::Json => Ok(serde_json::from_str(serialized)?),
    }
}

/// Serializes `value` into `path`, picking the format from the file extension.
pub fn save_to_file<T: Serialize>(value: &T, path: &Path) -> SerdeFormatResult<()> {
    let format = FileFormat::from_path(path)?;
    let text = serialize(value, format)?;
    fs::write(path, text).map_err(|source| SerdeFormatError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and deserializes `path`, picking the format from the file extension.
pub fn load_from_file<T: DeserializeOwned>(path: &Path) -> SerdeFormatResult<T> {
    let format = FileFormat::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|source| SerdeFormatError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    deserialize(&text, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<f64>,
    }

    fn sample() -> Sample {
        Sample {
            name: "gain".to_string(),
            values: vec![0.1, 1.0 / 3.0, -2.5e-7, 12345.678],
        }
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let text = serialize(&sample(), FileFormat::Json).unwrap();
        let back: Sample = deserialize(&text, FileFormat::Json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_yaml_round_trip() {
        let text = serialize(&sample(), FileFormat::Yaml).unwrap();
        let back: Sample = deserialize(&text, FileFormat::Yaml).unwrap();
        assert_eq!(back.name, "gain");
        for (a, b) in back.values.iter().zip(sample().values.iter()) {
            assert!((a - b).abs() <= 1e-12 * b.abs().max(1.0), "{a} vs {b}");
        }
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        save_to_file(&sample(), &path).unwrap();
        let back: Sample = load_from_file(&path).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = load_from_file::<Sample>(Path::new("/nonexistent/sample.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sample.yaml"));
    }
}
