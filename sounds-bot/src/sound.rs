use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use glob::{glob, Pattern};
use itertools::Itertools;
use tracing::{info, warn};

pub const FILETYPE: &str = "mp3";
pub const DEFAULT_FOLDER: &str = "misc";
const FOLDER_SEPARATORS: [char; 3] = [':', '/', '|'];
const SUGGESTION_THRESHOLD: f64 = 0.85;

/// Canonical filename stem for a free-text sound name.
///
/// Keeps ASCII letters, digits, spaces, apostrophes, underscores and hyphens.
/// Hyphens and spaces become underscores, runs of separators collapse into one
/// and the result is lowercased: `"Air Horn - Loud!"` becomes `"air_horn_loud"`.
pub fn slugify(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '\'' | '_' | '-'))
        .map(|c| if c == '-' { '_' } else { c })
        .collect();
    kept.split(|c: char| c == ' ' || c == '_')
        .filter(|part| !part.is_empty())
        .join("_")
        .to_lowercase()
}

/// Folds typographic apostrophes that chat clients like to insert.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().replace('\u{2019}', "'")
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Where a new sound goes: `<dir>/<folder>/<slug>.mp3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub folder: String,
    pub slug: String,
}

impl Placement {
    /// Splits `folder:name` (also `/` and `|`) and slugifies both halves.
    ///
    /// Returns `None` when nothing usable is left of the name.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let raw = normalize_name(raw);
        let (folder, name) = match FOLDER_SEPARATORS.iter().find(|sep| raw.contains(**sep)) {
            Some(sep) => raw.split_once(*sep).unwrap_or((DEFAULT_FOLDER, raw.as_str())),
            None => (DEFAULT_FOLDER, raw.as_str()),
        };
        let name = name.trim();
        let name = match name.len().checked_sub(FILETYPE.len() + 1) {
            Some(idx)
                if name.is_char_boundary(idx)
                    && name[idx..].eq_ignore_ascii_case(&format!(".{FILETYPE}")) =>
            {
                &name[..idx]
            }
            _ => name,
        };

        let slug = slugify(name);
        if slug.is_empty() {
            return None;
        }
        let folder = match slugify(folder) {
            f if f.is_empty() => DEFAULT_FOLDER.to_owned(),
            f => f,
        };
        Some(Self { folder, slug })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundFile {
    /// File stem as stored on disk.
    pub name: String,
    pub folder: String,
    pub path: PathBuf,
}

impl SoundFile {
    fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_stem()?.to_string_lossy().into_owned();
        let folder = path.parent()?.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            name,
            folder,
            path: path.into(),
        })
    }

    pub fn display_name(&self) -> String {
        self.name.replace('_', " ")
    }
}

/// A file that was (or would be) renamed to its canonical slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Folders of sound files under a single directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundStorage {
    pub dir: PathBuf,
}

impl SoundStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().into(),
        }
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Visible folder names, lexicographically sorted.
    pub fn folders(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read the sound directory {:?}: {e:?}", self.dir);
                return Vec::new();
            }
        };
        entries
            .flatten()
            .filter(|entry| entry.file_type().map_or(false, |t| t.is_dir()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !is_hidden(name))
            .sorted()
            .collect()
    }

    /// Every sound file, ordered by folder then name.
    pub fn files(&self) -> Vec<SoundFile> {
        let pattern = format!(
            "{}/*/*.{FILETYPE}",
            Pattern::escape(&self.dir.to_string_lossy())
        );
        let paths = match glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Invalid sound pattern {pattern}: {e:?}");
                return Vec::new();
            }
        };
        paths
            .flatten()
            .filter_map(SoundFile::from_path)
            .filter(|sound| !is_hidden(&sound.folder) && !is_hidden(&sound.name))
            .sorted_by(|a, b| (&a.folder, &a.name).cmp(&(&b.folder, &b.name)))
            .collect()
    }

    /// Looks a sound up by free-text name. Folders are scanned in
    /// lexicographic order and the first match wins.
    pub fn get(&self, name: impl AsRef<str>) -> Option<SoundFile> {
        let slug = slugify(&normalize_name(name.as_ref()));
        if slug.is_empty() {
            return None;
        }
        self.folders().into_iter().find_map(|folder| {
            let path = self.dir.join(&folder).join(format!("{slug}.{FILETYPE}"));
            path.is_file().then(|| SoundFile {
                name: slug.clone(),
                folder,
                path,
            })
        })
    }

    pub fn remove(&self, name: impl AsRef<str>) -> io::Result<Option<SoundFile>> {
        match self.get(name) {
            Some(sound) => {
                fs::remove_file(&sound.path)?;
                info!("Removed {:?}", sound.path);
                Ok(Some(sound))
            }
            None => Ok(None),
        }
    }

    /// Folder name to sorted display names. Empty folders are kept.
    pub fn list_all(&self) -> BTreeMap<String, Vec<String>> {
        let mut listing: BTreeMap<String, Vec<String>> = self
            .folders()
            .into_iter()
            .map(|folder| (folder, Vec::new()))
            .collect();
        for sound in self.files() {
            if let Some(names) = listing.get_mut(&sound.folder) {
                names.push(sound.display_name());
            }
        }
        for names in listing.values_mut() {
            names.sort();
        }
        listing
    }

    fn target_path(&self, placement: &Placement) -> io::Result<PathBuf> {
        let folder = self.dir.join(&placement.folder);
        fs::create_dir_all(&folder)?;
        Ok(folder.join(format!("{}.{FILETYPE}", placement.slug)))
    }

    /// Writes `content` through a temp file so a half-written upload never
    /// replaces an existing sound.
    pub fn store(&self, placement: &Placement, content: &[u8]) -> io::Result<SoundFile> {
        use std::io::Write;

        let target = self.target_path(placement)?;
        let folder = target.parent().unwrap_or(self.dir.as_path());
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload")
            .suffix(&format!(".{FILETYPE}"))
            .tempfile_in(folder)?;
        tmp.write_all(content)?;
        tmp.persist(&target).map_err(|e| e.error)?;
        info!("Stored {:?}", target);
        Ok(SoundFile {
            name: placement.slug.clone(),
            folder: placement.folder.clone(),
            path: target,
        })
    }

    /// Moves a finished file into the library.
    pub fn store_file(&self, placement: &Placement, source: &Path) -> io::Result<SoundFile> {
        let target = self.target_path(placement)?;
        fs::rename(source, &target)?;
        info!("Moved {:?} to {:?}", source, target);
        Ok(SoundFile {
            name: placement.slug.clone(),
            folder: placement.folder.clone(),
            path: target,
        })
    }

    pub fn calc_similarities(&self, query: impl AsRef<str>) -> Vec<(f64, SoundFile)> {
        let query = slugify(&normalize_name(query.as_ref()));
        let mut sims: Vec<_> = self
            .files()
            .into_iter()
            .map(|sound| (strsim::jaro_winkler(&query, &sound.name.to_lowercase()), sound))
            .collect();
        sims.sort_by(|(d1, _), (d2, _)| d2.total_cmp(d1));
        sims
    }

    /// Close display names for a failed lookup.
    pub fn suggestions(&self, query: impl AsRef<str>, limit: usize) -> Vec<String> {
        self.calc_similarities(query)
            .into_iter()
            .filter(|(s, _)| *s > SUGGESTION_THRESHOLD)
            .map(|(_, sound)| sound.display_name())
            .unique()
            .take(limit)
            .collect()
    }

    /// Renames files whose stem is not already a canonical slug. Existing
    /// targets are never overwritten.
    pub fn canonicalize_names(&self, dry_run: bool) -> io::Result<Vec<Rename>> {
        let mut renames = Vec::new();
        for sound in self.files() {
            let slug = slugify(&sound.name);
            if slug.is_empty() || slug == sound.name {
                continue;
            }
            let to = sound.path.with_file_name(format!("{slug}.{FILETYPE}"));
            if to.exists() {
                warn!("Skipping {:?}: {:?} already exists", sound.path, to);
                continue;
            }
            if !dry_run {
                fs::rename(&sound.path, &to)?;
            }
            renames.push(Rename {
                from: sound.path,
                to,
            });
        }
        Ok(renames)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn touch(dir: &Path, folder: &str, file: &str) -> PathBuf {
        let folder = dir.join(folder);
        fs::create_dir_all(&folder).unwrap();
        let path = folder.join(file);
        fs::write(&path, b"ID3").unwrap();
        path
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Air Horn - Loud!"), "air_horn_loud");
        assert_eq!(slugify("  it's   over 9000 "), "it's_over_9000");
        assert_eq!(slugify("my-sound"), "my_sound");
        assert_eq!(slugify("Été"), "t");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_placement() {
        assert_eq!(
            Placement::from_raw("Memes:Air Horn.mp3"),
            Some(Placement {
                folder: "memes".to_owned(),
                slug: "air_horn".to_owned(),
            })
        );
        assert_eq!(
            Placement::from_raw("movies/I'll be back"),
            Some(Placement {
                folder: "movies".to_owned(),
                slug: "i'll_be_back".to_owned(),
            })
        );
        assert_eq!(
            Placement::from_raw("wow.MP3"),
            Some(Placement {
                folder: DEFAULT_FOLDER.to_owned(),
                slug: "wow".to_owned(),
            })
        );
        assert_eq!(Placement::from_raw("misc:.mp3"), None);
    }

    #[test]
    fn test_get_is_idempotent_until_removed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = touch(temp_dir.path(), "misc", "air_horn.mp3");
        let storage = SoundStorage::new(temp_dir.path());

        let first = storage.get("Air Horn").unwrap();
        assert_eq!(first.path, path);
        assert_eq!(storage.get("air horn"), Some(first.clone()));
        assert_eq!(storage.get("  air-horn "), Some(first));

        assert!(storage.remove("air horn").unwrap().is_some());
        assert_eq!(storage.get("air horn"), None);
        assert!(storage.remove("air horn").unwrap().is_none());
    }

    #[test]
    fn test_get_prefers_first_folder() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "zoo", "moo.mp3");
        let expected = touch(temp_dir.path(), "farm", "moo.mp3");
        let storage = SoundStorage::new(temp_dir.path());
        assert_eq!(storage.get("moo").unwrap().path, expected);
    }

    #[test]
    fn test_typographic_apostrophe() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "misc", "i'll_be_back.mp3");
        let storage = SoundStorage::new(temp_dir.path());
        assert!(storage.get("I\u{2019}ll be back").is_some());
    }

    #[test]
    fn test_list_all() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "misc", "zebra.mp3");
        touch(temp_dir.path(), "misc", "air_horn.mp3");
        touch(temp_dir.path(), "movies", "i'll_be_back.mp3");
        touch(temp_dir.path(), ".download123", "partial.mp3");
        touch(temp_dir.path(), "misc", ".upload42.mp3");
        fs::create_dir_all(temp_dir.path().join("empty")).unwrap();
        let storage = SoundStorage::new(temp_dir.path());

        let listing = storage.list_all();
        assert_eq!(
            listing.keys().collect::<Vec<_>>(),
            vec!["empty", "misc", "movies"]
        );
        assert_eq!(listing["misc"], vec!["air horn", "zebra"]);
        assert_eq!(listing["movies"], vec!["i'll be back"]);
        assert!(listing["empty"].is_empty());
    }

    #[test]
    fn test_store_creates_folder_and_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SoundStorage::new(temp_dir.path());
        let placement = Placement::from_raw("memes:bruh.mp3").unwrap();

        let sound = storage.store(&placement, b"first").unwrap();
        assert_eq!(sound.path, temp_dir.path().join("memes").join("bruh.mp3"));
        storage.store(&placement, b"second").unwrap();
        assert_eq!(fs::read(&sound.path).unwrap(), b"second");
        assert_eq!(storage.files().len(), 1);
    }

    #[test]
    fn test_store_file_moves_into_place() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SoundStorage::new(temp_dir.path().join("sounds"));
        let source = temp_dir.path().join("downloaded.mp3");
        fs::write(&source, b"audio").unwrap();

        let placement = Placement::from_raw("yt|never gonna").unwrap();
        let sound = storage.store_file(&placement, &source).unwrap();
        assert!(!source.exists());
        assert_eq!(storage.get("never gonna"), Some(sound));
    }

    #[test]
    fn test_suggestions() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "misc", "dadeisan.mp3");
        touch(temp_dir.path(), "misc", "sainou.mp3");
        let storage = SoundStorage::new(temp_dir.path());
        let sims = storage.calc_similarities("dadei");
        assert_eq!(sims[0].1.name, "dadeisan");
        assert_eq!(storage.suggestions("dadeisa", 5), vec!["dadeisan"]);
    }

    #[test]
    fn test_canonicalize_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "misc", "Air-Horn.mp3");
        touch(temp_dir.path(), "misc", "fine.mp3");
        let storage = SoundStorage::new(temp_dir.path());

        let planned = storage.canonicalize_names(true).unwrap();
        assert_eq!(planned.len(), 1);
        assert!(storage.get("air horn").is_none());

        let done = storage.canonicalize_names(false).unwrap();
        assert_eq!(done, planned);
        assert!(storage.get("air horn").is_some());
    }
}
