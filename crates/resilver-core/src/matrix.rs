//! Test matrix and resumable checkpoints.
//!
//! The matrix is the cartesian product of layouts, fragmentation levels,
//! record sizes and stress profiles, iterated layout-major. A [`Checkpoint`]
//! is a 4-tuple index into it. Resuming from a checkpoint starts each inner
//! dimension at its checkpoint component only for the first pass; once a
//! dimension wraps it restarts from zero, like an odometer.

use resilver_proto::{
    Configuration, Error, FragLevel, LayoutSpec, Result, StressLevel, StressProfile,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Position in the matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub layout: usize,
    pub frag: usize,
    pub record_size: usize,
    pub stress: usize,
}

impl Checkpoint {
    pub fn new(layout: usize, frag: usize, record_size: usize, stress: usize) -> Self {
        Self {
            layout,
            frag,
            record_size,
            stress,
        }
    }

    /// Steps to the next position. Returns false when the matrix is exhausted.
    pub fn advance(&mut self, dims: Dims) -> bool {
        self.stress += 1;
        if self.stress < dims.stress {
            return true;
        }
        self.stress = 0;
        self.record_size += 1;
        if self.record_size < dims.record_size {
            return true;
        }
        self.record_size = 0;
        self.frag += 1;
        if self.frag < dims.frag {
            return true;
        }
        self.frag = 0;
        self.layout += 1;
        self.layout < dims.layout
    }
}

/// Renders as the test index used in logs and results, `[l, f, r, s]`.
impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.layout, self.frag, self.record_size, self.stress
        )
    }
}

/// Parses `l,f,r,s`, with optional brackets and spaces.
impl FromStr for Checkpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
        let parts = inner
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("bad checkpoint '{s}': {e}")))?;
        match parts.as_slice() {
            [l, f, r, st] => Ok(Self::new(*l, *f, *r, *st)),
            _ => Err(Error::Config(format!(
                "checkpoint '{s}' must have four components"
            ))),
        }
    }
}

/// Sizes of the four dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub layout: usize,
    pub frag: usize,
    pub record_size: usize,
    pub stress: usize,
}

impl Dims {
    pub fn total(self) -> usize {
        self.layout * self.frag * self.record_size * self.stress
    }

    pub fn contains(self, cp: Checkpoint) -> bool {
        cp.layout < self.layout
            && cp.frag < self.frag
            && cp.record_size < self.record_size
            && cp.stress < self.stress
    }

    /// Zero-based position of `cp` in iteration order.
    pub fn ordinal(self, cp: Checkpoint) -> usize {
        ((cp.layout * self.frag + cp.frag) * self.record_size + cp.record_size) * self.stress + cp.stress
    }
}

/// The full set of configurations to test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Matrix {
    pub layouts: Vec<LayoutSpec>,
    pub frag_levels: Vec<FragLevel>,
    pub record_sizes: Vec<String>,
    pub stress_profiles: Vec<StressProfile>,
}

/// The reference test plan: 16 layouts, three fragmentation levels, two
/// record sizes and seven stress profiles.
impl Default for Matrix {
    fn default() -> Self {
        let layouts = [
            ("draid2:32d:82c:2s", 82, 0),
            ("draid2:16d:82c:2s", 82, 0),
            ("draid2:8d:82c:2s", 82, 0),
            ("draid2:4d:82c:2s", 82, 0),
            ("draid2:32d:41c:1s", 41, 0),
            ("draid2:16d:41c:1s", 41, 0),
            ("draid2:8d:41c:1s", 41, 0),
            ("draid2:4d:41c:1s", 41, 0),
            ("raidz2", 40, 0),
            ("raidz2", 20, 0),
            ("raidz2", 10, 0),
            ("raidz2", 5, 0),
            ("raidz3", 10, 0),
            ("raidz1", 10, 0),
            ("mirror", 2, 1),
            ("mirror", 3, 1),
        ];
        let stress = [
            (StressLevel::None, StressLevel::None),
            (StressLevel::Med, StressLevel::None),
            (StressLevel::High, StressLevel::None),
            (StressLevel::None, StressLevel::Med),
            (StressLevel::None, StressLevel::High),
            (StressLevel::Med, StressLevel::Med),
            (StressLevel::High, StressLevel::High),
        ];
        Self {
            layouts: layouts
                .into_iter()
                .map(|(layout, width, spares)| LayoutSpec::new(layout, width, spares))
                .collect(),
            frag_levels: vec![FragLevel::None, FragLevel::Med, FragLevel::High],
            record_sizes: vec!["1M".to_string(), "128k".to_string()],
            stress_profiles: stress
                .into_iter()
                .map(|(cpu, disk)| StressProfile::new(cpu, disk))
                .collect(),
        }
    }
}

impl Matrix {
    pub fn dims(&self) -> Dims {
        Dims {
            layout: self.layouts.len(),
            frag: self.frag_levels.len(),
            record_size: self.record_sizes.len(),
            stress: self.stress_profiles.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.dims().total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configuration at a checkpoint, if in range.
    pub fn get(&self, cp: Checkpoint) -> Option<Configuration> {
        Some(Configuration {
            layout: self.layouts.get(cp.layout)?.clone(),
            frag: *self.frag_levels.get(cp.frag)?,
            record_size: self.record_sizes.get(cp.record_size)?.clone(),
            stress: *self.stress_profiles.get(cp.stress)?,
        })
    }

    /// Iterates from `start` to the end of the matrix.
    pub fn cursor(&self, start: Checkpoint) -> Result<MatrixCursor<'_>> {
        let dims = self.dims();
        if dims.total() == 0 {
            return Err(Error::Config("test matrix has an empty dimension".into()));
        }
        if !dims.contains(start) {
            return Err(Error::Config(format!(
                "checkpoint {start} is outside the {}x{}x{}x{} matrix",
                dims.layout, dims.frag, dims.record_size, dims.stress
            )));
        }
        Ok(MatrixCursor {
            matrix: self,
            next: Some(start),
        })
    }
}

/// Iterator over `(checkpoint, configuration)` pairs.
#[derive(Debug, Clone)]
pub struct MatrixCursor<'a> {
    matrix: &'a Matrix,
    next: Option<Checkpoint>,
}

impl Iterator for MatrixCursor<'_> {
    type Item = (Checkpoint, Configuration);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let config = self.matrix.get(current)?;
        let mut following = current;
        self.next = following.advance(self.matrix.dims()).then_some(following);
        Some((current, config))
    }
}

/// What the checkpoint file stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Next case to run, or `None` once the matrix is finished.
    pub next: Option<Checkpoint>,
    pub completed: usize,
}

/// JSON file holding the resume point.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored state; a missing file yields `None`.
    pub fn load(&self) -> Result<Option<CheckpointFile>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                Error::Config(format!("corrupt checkpoint file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes atomically through a temporary sibling file.
    pub fn save(&self, state: &CheckpointFile) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Config(format!("cannot encode checkpoint: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(l: usize, f: usize, r: usize, s: usize) -> Matrix {
        let frags = [FragLevel::None, FragLevel::Med, FragLevel::High];
        Matrix {
            layouts: (0..l).map(|i| LayoutSpec::new("raidz2", 4 + i as u32, 0)).collect(),
            frag_levels: frags[..f].to_vec(),
            record_sizes: ["1M", "128k", "16k"][..r].iter().map(|s| (*s).to_string()).collect(),
            stress_profiles: (0..s)
                .map(|i| StressProfile::new(if i % 2 == 0 { StressLevel::None } else { StressLevel::Med }, StressLevel::None))
                .collect(),
        }
    }

    #[test]
    fn test_default_plan_dimensions() {
        let m = Matrix::default();
        assert_eq!(m.dims(), Dims { layout: 16, frag: 3, record_size: 2, stress: 7 });
        assert_eq!(m.len(), 672);
        assert_eq!(m.layouts[14].min_spares, 1);
    }

    #[test]
    fn test_checkpoint_display_and_parse() {
        let cp = Checkpoint::new(3, 1, 0, 6);
        assert_eq!(cp.to_string(), "[3, 1, 0, 6]");
        assert_eq!("[3, 1, 0, 6]".parse::<Checkpoint>().unwrap(), cp);
        assert_eq!("3,1,0,6".parse::<Checkpoint>().unwrap(), cp);
        assert!("3,1,0".parse::<Checkpoint>().is_err());
        assert!("a,b,c,d".parse::<Checkpoint>().is_err());
    }

    #[test]
    fn test_full_iteration_visits_every_case_once() {
        let m = matrix(2, 3, 2, 7);
        let visited: Vec<Checkpoint> = m.cursor(Checkpoint::default()).unwrap().map(|(cp, _)| cp).collect();
        assert_eq!(visited.len(), 84);
        assert!(visited.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_resume_resets_inner_dimensions_after_wrap() {
        let m = matrix(2, 3, 2, 7);
        let start = Checkpoint::new(0, 1, 1, 5);
        let visited: Vec<Checkpoint> = m.cursor(start).unwrap().map(|(cp, _)| cp).collect();

        assert_eq!(visited[0], start);
        assert_eq!(visited[1], Checkpoint::new(0, 1, 1, 6));
        assert_eq!(visited[2], Checkpoint::new(0, 2, 0, 0));
        assert!(visited.contains(&Checkpoint::new(1, 0, 0, 0)));
        assert_eq!(visited.len(), m.len() - m.dims().ordinal(start));
        assert_eq!(visited.last(), Some(&Checkpoint::new(1, 2, 1, 6)));
    }

    #[test]
    fn test_out_of_range_checkpoint_rejected() {
        let m = matrix(2, 3, 2, 7);
        assert!(m.cursor(Checkpoint::new(2, 0, 0, 0)).is_err());
        assert!(m.cursor(Checkpoint::new(0, 0, 0, 7)).is_err());
    }

    #[test]
    fn test_empty_dimension_rejected() {
        let m = matrix(2, 3, 0, 7);
        assert!(m.is_empty());
        assert!(m.cursor(Checkpoint::default()).is_err());
    }

    #[test]
    fn test_checkpoint_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert_eq!(store.load().unwrap(), None);

        let state = CheckpointFile {
            next: Some(Checkpoint::new(1, 2, 0, 3)),
            completed: 12,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_corrupt_checkpoint_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(CheckpointStore::new(path).load(), Err(Error::Config(_))));
    }
}
