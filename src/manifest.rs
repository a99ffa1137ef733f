//! Manifest rows, oversampling and the dense speaker id map.

use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
};

use crate::error::{DataError, Result};

/// One `path|transcript|speaker_id` row of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub audio_path: PathBuf,
    pub transcript: String,
    pub speaker_id: String,
}

impl Example {
    pub fn new(audio_path: impl Into<PathBuf>, transcript: impl Into<String>, speaker_id: impl Into<String>) -> Self {
        Self {
            audio_path: audio_path.into(),
            transcript: transcript.into(),
            speaker_id: speaker_id.into(),
        }
    }
}

/// Loads every manifest matching `pattern`, in sorted path order.
pub fn load_manifest(pattern: &str) -> Result<Vec<Example>> {
    let mut paths = glob::glob(pattern)?.collect::<std::result::Result<Vec<PathBuf>, _>>()?;
    paths.retain(|p| p.is_file());
    if paths.is_empty() {
        return Err(DataError::EmptyManifestGlob(pattern.to_string()));
    }
    paths.sort();

    let mut examples = Vec::new();
    for path in paths {
        let raw = fs::read_to_string(&path).map_err(|e| DataError::io(&path, e))?;
        examples.extend(parse_manifest(&raw, &path)?);
    }
    Ok(examples)
}

/// Parses manifest text. `source` is only used for error messages.
pub fn parse_manifest(raw: &str, source: &Path) -> Result<Vec<Example>> {
    let mut examples = Vec::new();
    for (line_idx, line) in raw.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        match fields.as_slice() {
            [path, transcript, speaker] if !path.is_empty() => {
                examples.push(Example::new(*path, *transcript, speaker.trim()));
            }
            _ => {
                return Err(DataError::MalformedManifestRow {
                    manifest: source.to_path_buf(),
                    line: line_idx + 1,
                    row: line.to_string(),
                });
            }
        }
    }
    Ok(examples)
}

/// Repeats every row `weights[speaker]` times, keeping rows for the same source together.
pub fn oversample(examples: Vec<Example>, weights: &HashMap<String, usize>) -> Result<Vec<Example>> {
    if let Some((speaker, &weight)) = weights.iter().find(|(_, w)| **w == 0) {
        return Err(DataError::InvalidOversampleWeight { speaker: speaker.clone(), weight });
    }

    let total: usize = examples.iter().map(|e| weights.get(&e.speaker_id).copied().unwrap_or(1)).sum();
    let mut output = Vec::with_capacity(total);
    for example in examples {
        let repeats = weights.get(&example.speaker_id).copied().unwrap_or(1);
        for _ in 1..repeats {
            output.push(example.clone());
        }
        output.push(example);
    }
    Ok(output)
}

/// Bijection from raw manifest speaker ids to `0..num_speakers`.
///
/// Ids are ordered numerically when all of them are integers, lexicographically otherwise.
#[derive(Debug, Clone, Default)]
pub struct SpeakerIdMap {
    dense: HashMap<String, usize>,
}

impl SpeakerIdMap {
    pub fn build<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = ids.into_iter().collect();
        let mut ordered: Vec<&str> = distinct.into_iter().collect();
        if ordered.iter().all(|id| id.parse::<i64>().is_ok()) {
            ordered.sort_by_key(|id| id.parse::<i64>().unwrap_or_default());
        }
        let dense = ordered.into_iter().enumerate().map(|(idx, id)| (id.to_string(), idx)).collect();
        Self { dense }
    }

    pub fn get(&self, speaker_id: &str) -> Result<usize> {
        self.dense
            .get(speaker_id)
            .copied()
            .ok_or_else(|| DataError::UnknownSpeaker(speaker_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Example> {
        vec![
            Example::new("a.wav", "one", "1"),
            Example::new("b.wav", "two", "2"),
            Example::new("c.wav", "three", "1"),
            Example::new("d.wav", "four", "3"),
        ]
    }

    #[test]
    fn oversampling_repeats_weighted_speakers() {
        let weights = HashMap::from([("1".to_string(), 3), ("3".to_string(), 2)]);
        let out = oversample(rows(), &weights).unwrap();
        let count = |path: &str| out.iter().filter(|e| e.audio_path == Path::new(path)).count();
        assert_eq!(count("a.wav"), 3);
        assert_eq!(count("c.wav"), 3);
        assert_eq!(count("d.wav"), 2);
        assert_eq!(count("b.wav"), 1);
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn zero_weight_is_rejected() {
        let weights = HashMap::from([("2".to_string(), 0)]);
        assert!(matches!(
            oversample(rows(), &weights),
            Err(DataError::InvalidOversampleWeight { weight: 0, .. })
        ));
    }

    #[test]
    fn speaker_map_is_dense_and_numeric() {
        let map = SpeakerIdMap::build(["10", "2", "10", "33", "2"]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("2").unwrap(), 0);
        assert_eq!(map.get("10").unwrap(), 1);
        assert_eq!(map.get("33").unwrap(), 2);
        assert_eq!(map.get("10").unwrap(), 1);
        assert!(map.get("4").is_err());
    }

    #[test]
    fn speaker_map_falls_back_to_lexicographic() {
        let map = SpeakerIdMap::build(["bob", "alice", "7"]);
        assert_eq!(map.get("7").unwrap(), 0);
        assert_eq!(map.get("alice").unwrap(), 1);
        assert_eq!(map.get("bob").unwrap(), 2);
    }

    #[test]
    fn malformed_rows_fail_with_line_number() {
        let raw = "a.wav|hello|1\n\nb.wav|missing speaker\n";
        match parse_manifest(raw, Path::new("list.txt")) {
            Err(DataError::MalformedManifestRow { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_glob_directory_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("train.txt"), "a.wav|hi|1\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits don't bind root; nothing to observe then.
        let readable = fs::read_dir(&locked).is_ok();
        let result = load_manifest(&format!("{}/*/*.txt", dir.path().display()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        if readable {
            return;
        }
        assert!(matches!(result, Err(DataError::Glob(_))));
    }
}
