//! Indexing a dataset root into a triplet source.

use crate::types::{DatasetError, DatasetResult, Place, Triplet};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the explicit triplet list looked up under the dataset root.
pub const TRIPLET_LIST_NAME: &str = "triplets.txt";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Where triplets come from for an epoch.
#[derive(Debug, Clone)]
pub enum TripletSource {
    /// Fixed triplets read from a list file; each is yielded once per epoch.
    List(Vec<Triplet>),
    /// Places to sample anchor/positive (same place) and negative (other place) from.
    Places(Vec<Place>),
}

impl TripletSource {
    /// Resolve a dataset root: an explicit `triplets.txt` wins over place directories.
    pub fn from_root(root: &Path) -> DatasetResult<Self> {
        let list = root.join(TRIPLET_LIST_NAME);
        if list.is_file() {
            let triplets = parse_triplet_list(&list, root)?;
            if triplets.is_empty() {
                return Err(DatasetError::EmptyDataset {
                    root: root.to_path_buf(),
                    msg: format!("{} lists no triplets", list.display()),
                });
            }
            return Ok(TripletSource::List(triplets));
        }
        let places = index_places(root)?;
        validate_places(root, &places)?;
        Ok(TripletSource::Places(places))
    }

    pub fn describe(&self) -> String {
        match self {
            TripletSource::List(t) => format!("triplet list ({} triplets)", t.len()),
            TripletSource::Places(p) => {
                let views: usize = p.iter().map(|p| p.views.len()).sum();
                format!("{} places, {} views", p.len(), views)
            }
        }
    }

    /// Triplets for one epoch. `epoch_size` only applies to sampled sources.
    pub fn epoch_triplets<R: Rng>(
        &self,
        epoch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Vec<Triplet> {
        match self {
            TripletSource::List(list) => {
                let mut out = list.clone();
                if shuffle {
                    out.shuffle(rng);
                }
                out
            }
            TripletSource::Places(places) => sample_triplets(places, epoch_size, rng),
        }
    }

    /// Triplets yielded per epoch for this source.
    pub fn epoch_len(&self, epoch_size: usize) -> usize {
        match self {
            TripletSource::List(list) => list.len(),
            TripletSource::Places(_) => epoch_size,
        }
    }
}

/// Parse `anchor positive negative` lines; relative paths resolve against `base`.
pub fn parse_triplet_list(path: &Path, base: &Path) -> DatasetResult<Vec<Triplet>> {
    let raw = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    let mut out = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(DatasetError::TripletList {
                path: path.to_path_buf(),
                line: i + 1,
                msg: format!("expected 3 paths, found {}", parts.len()),
            });
        }
        let resolve = |p: &str| -> PathBuf {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        out.push(Triplet {
            anchor: resolve(parts[0]),
            positive: resolve(parts[1]),
            negative: resolve(parts[2]),
        });
    }
    Ok(out)
}

/// Every immediate subdirectory is a place; its image files are the views (sorted).
pub fn index_places(root: &Path) -> DatasetResult<Vec<Place>> {
    let mut places = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| DatasetError::io(root, e))? {
        let entry = entry.map_err(|e| DatasetError::io(root, e))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let mut views = Vec::new();
        for view in fs::read_dir(&dir).map_err(|e| DatasetError::io(&dir, e))? {
            let view = view.map_err(|e| DatasetError::io(&dir, e))?.path();
            if view.is_file() && is_image(&view) {
                views.push(view);
            }
        }
        if views.is_empty() {
            continue;
        }
        views.sort();
        places.push(Place { dir, views });
    }
    places.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(places)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn validate_places(root: &Path, places: &[Place]) -> DatasetResult<()> {
    if places.len() < 2 {
        return Err(DatasetError::EmptyDataset {
            root: root.to_path_buf(),
            msg: format!("need at least 2 place directories, found {}", places.len()),
        });
    }
    if !places.iter().any(|p| p.views.len() >= 2) {
        return Err(DatasetError::EmptyDataset {
            root: root.to_path_buf(),
            msg: "no place has at least 2 views for an anchor/positive pair".to_string(),
        });
    }
    Ok(())
}

/// Draw `count` triplets: anchor/positive are distinct views of one place, negative another place.
///
/// Callers must pass places that passed validation (two places, one with two views).
pub fn sample_triplets<R: Rng>(places: &[Place], count: usize, rng: &mut R) -> Vec<Triplet> {
    let pairable: Vec<usize> = places
        .iter()
        .enumerate()
        .filter(|(_, p)| p.views.len() >= 2)
        .map(|(i, _)| i)
        .collect();
    if pairable.is_empty() || places.len() < 2 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let pi = pairable[rng.random_range(0..pairable.len())];
        let place = &places[pi];
        let a = rng.random_range(0..place.views.len());
        let mut p = rng.random_range(0..place.views.len() - 1);
        if p >= a {
            p += 1;
        }
        let mut ni = rng.random_range(0..places.len() - 1);
        if ni >= pi {
            ni += 1;
        }
        let other = &places[ni];
        let n = rng.random_range(0..other.views.len());
        out.push(Triplet {
            anchor: place.views[a].clone(),
            positive: place.views[p].clone(),
            negative: other.views[n].clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn place(name: &str, views: usize) -> Place {
        Place {
            dir: PathBuf::from(name),
            views: (0..views)
                .map(|i| PathBuf::from(format!("{name}/{i}.png")))
                .collect(),
        }
    }

    #[test]
    fn sampled_triplets_respect_places() {
        let places = vec![place("a", 3), place("b", 1), place("c", 2)];
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let triplets = sample_triplets(&places, 200, &mut rng);
        assert_eq!(triplets.len(), 200);
        for t in triplets {
            assert_ne!(t.anchor, t.positive);
            assert_eq!(t.anchor.parent(), t.positive.parent());
            assert_ne!(t.anchor.parent(), t.negative.parent());
            assert_ne!(t.anchor.parent(), Some(Path::new("b")));
        }
    }

    #[test]
    fn sampling_is_seed_deterministic() {
        let places = vec![place("a", 4), place("b", 4)];
        let mut r1 = rand::rngs::StdRng::seed_from_u64(11);
        let mut r2 = rand::rngs::StdRng::seed_from_u64(11);
        assert_eq!(
            sample_triplets(&places, 16, &mut r1),
            sample_triplets(&places, 16, &mut r2)
        );
    }

    #[test]
    fn validation_requires_a_pair_and_a_negative() {
        let root = Path::new("root");
        assert!(validate_places(root, &[place("a", 5)]).is_err());
        assert!(validate_places(root, &[place("a", 1), place("b", 1)]).is_err());
        assert!(validate_places(root, &[place("a", 2), place("b", 1)]).is_ok());
    }

    #[test]
    fn list_source_ignores_epoch_size() {
        let t = Triplet {
            anchor: "a".into(),
            positive: "p".into(),
            negative: "n".into(),
        };
        let source = TripletSource::List(vec![t.clone(), t]);
        assert_eq!(source.epoch_len(1000), 2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        assert_eq!(source.epoch_triplets(1000, true, &mut rng).len(), 2);
    }

    #[test]
    fn image_extensions_case_insensitive() {
        assert!(is_image(Path::new("x/VIEW.JPG")));
        assert!(is_image(Path::new("x/view.png")));
        assert!(!is_image(Path::new("x/notes.txt")));
        assert!(!is_image(Path::new("x/noext")));
    }
}
