use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Unseen,
    Done,
    Inaccessible,
}

/// The two persisted membership lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateList {
    Done,
    Inaccessible,
}

pub trait StatePersistence {
    /// Returns the stored identifiers; a list that was never written is empty.
    fn load(&self, list: StateList) -> io::Result<Vec<String>>;
    /// Replaces the whole list.
    fn save(&self, list: StateList, entries: &[String]) -> io::Result<()>;
}

/// One identifier per line in two flat text files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatePersistence {
    done_path: PathBuf,
    inaccessible_path: PathBuf,
}

impl FileStatePersistence {
    pub fn new(done_path: impl Into<PathBuf>, inaccessible_path: impl Into<PathBuf>) -> Self {
        Self {
            done_path: done_path.into(),
            inaccessible_path: inaccessible_path.into(),
        }
    }

    fn path(&self, list: StateList) -> &Path {
        match list {
            StateList::Done => &self.done_path,
            StateList::Inaccessible => &self.inaccessible_path,
        }
    }
}

impl StatePersistence for FileStatePersistence {
    fn load(&self, list: StateList) -> io::Result<Vec<String>> {
        let text = match fs::read_to_string(self.path(list)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn save(&self, list: StateList, entries: &[String]) -> io::Result<()> {
        let path = self.path(list);
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        // Write beside the target and rename so a crash never truncates the list.
        let mut file = NamedTempFile::new_in(&parent)?;
        file.write_all(entries.join("\n").as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStatePersistence {
    lists: Mutex<HashMap<StateList, Vec<String>>>,
}

impl InMemoryStatePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(done: &[&str], inaccessible: &[&str]) -> Self {
        let owned = |ids: &[&str]| -> Vec<String> { ids.iter().map(|id| id.to_string()).collect() };
        let mut lists = HashMap::new();
        lists.insert(StateList::Done, owned(done));
        lists.insert(StateList::Inaccessible, owned(inaccessible));
        Self {
            lists: Mutex::new(lists),
        }
    }

    pub fn entries(&self, list: StateList) -> Vec<String> {
        self.lists
            .lock()
            .ok()
            .and_then(|lists| lists.get(&list).cloned())
            .unwrap_or_default()
    }
}

impl StatePersistence for InMemoryStatePersistence {
    fn load(&self, list: StateList) -> io::Result<Vec<String>> {
        Ok(self.entries(list))
    }

    fn save(&self, list: StateList, entries: &[String]) -> io::Result<()> {
        let mut lists = self
            .lists
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "state lists poisoned"))?;
        lists.insert(list, entries.to_vec());
        Ok(())
    }
}

/// Which galleries are finished or out of reach, persisted after every change.
#[derive(Debug)]
pub struct JobStateStore<P: StatePersistence = FileStatePersistence> {
    persistence: P,
    done: BTreeSet<String>,
    inaccessible: BTreeSet<String>,
}

impl<P: StatePersistence> JobStateStore<P> {
    pub fn open(persistence: P) -> io::Result<Self> {
        let done: BTreeSet<String> = persistence.load(StateList::Done)?.into_iter().collect();
        let mut inaccessible: BTreeSet<String> = persistence
            .load(StateList::Inaccessible)?
            .into_iter()
            .collect();

        let conflicting: Vec<String> = inaccessible.intersection(&done).cloned().collect();
        for id in conflicting {
            log::warn!("{} is listed as both done and inaccessible, keeping done", id);
            inaccessible.remove(&id);
        }

        Ok(Self {
            persistence,
            done,
            inaccessible,
        })
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.done.contains(normalize_id(id))
    }

    pub fn is_inaccessible(&self, id: &str) -> bool {
        self.inaccessible.contains(normalize_id(id))
    }

    pub fn state(&self, id: &str) -> JobState {
        if self.is_done(id) {
            JobState::Done
        } else if self.is_inaccessible(id) {
            JobState::Inaccessible
        } else {
            JobState::Unseen
        }
    }

    pub fn mark_done(&mut self, id: &str) -> io::Result<()> {
        self.mark(normalize_id(id), StateList::Done)
    }

    pub fn mark_inaccessible(&mut self, id: &str) -> io::Result<()> {
        self.mark(normalize_id(id), StateList::Inaccessible)
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    fn set(&self, list: StateList) -> &BTreeSet<String> {
        match list {
            StateList::Done => &self.done,
            StateList::Inaccessible => &self.inaccessible,
        }
    }

    fn set_mut(&mut self, list: StateList) -> &mut BTreeSet<String> {
        match list {
            StateList::Done => &mut self.done,
            StateList::Inaccessible => &mut self.inaccessible,
        }
    }

    /// Writes the list the id leaves before the list it joins, so an
    /// interrupted move never leaves it in both. Memory only changes after
    /// the matching save succeeds.
    fn mark(&mut self, id: &str, list: StateList) -> io::Result<()> {
        let other = match list {
            StateList::Done => StateList::Inaccessible,
            StateList::Inaccessible => StateList::Done,
        };

        if self.set(other).contains(id) {
            let mut remaining = self.set(other).clone();
            remaining.remove(id);
            self.persistence.save(other, &entries(&remaining))?;
            *self.set_mut(other) = remaining;
        }

        if !self.set(list).contains(id) {
            let mut joined = self.set(list).clone();
            joined.insert(id.to_string());
            self.persistence.save(list, &entries(&joined))?;
            *self.set_mut(list) = joined;
        }

        Ok(())
    }
}

fn normalize_id(id: &str) -> &str {
    id.trim()
}

fn entries(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GALLERY: &str = "https://example.net/hentai/sample-gallery";

    #[test]
    fn marks_are_mutually_exclusive_and_latest_wins() {
        let mut store = JobStateStore::open(InMemoryStatePersistence::new()).expect("open");
        assert_eq!(store.state(GALLERY), JobState::Unseen);

        store.mark_done(GALLERY).expect("mark done");
        assert!(store.is_done(GALLERY));
        assert!(!store.is_inaccessible(GALLERY));

        store.mark_inaccessible(GALLERY).expect("mark inaccessible");
        assert!(store.is_inaccessible(GALLERY));
        assert!(!store.is_done(GALLERY));

        store.mark_done(GALLERY).expect("mark done again");
        assert!(store.is_done(GALLERY));
        assert!(!store.is_inaccessible(GALLERY));
        assert_eq!(store.state(GALLERY), JobState::Done);

        let persistence = store.persistence();
        assert_eq!(persistence.entries(StateList::Done), vec![GALLERY.to_string()]);
        assert!(persistence.entries(StateList::Inaccessible).is_empty());
    }

    #[test]
    fn overlapping_lists_resolve_to_done_on_open() {
        let persistence = InMemoryStatePersistence::with_entries(&[GALLERY], &[GALLERY, "other"]);
        let store = JobStateStore::open(persistence).expect("open");
        assert_eq!(store.state(GALLERY), JobState::Done);
        assert_eq!(store.state("other"), JobState::Inaccessible);
    }

    #[test]
    fn missing_files_are_empty_sets() {
        let temp = TempDir::new().expect("temp dir");
        let persistence = FileStatePersistence::new(
            temp.path().join("done.txt"),
            temp.path().join("inaccessible.txt"),
        );
        let store = JobStateStore::open(persistence).expect("open");
        assert_eq!(store.state(GALLERY), JobState::Unseen);
    }

    #[test]
    fn file_store_persists_full_lists_and_reloads() {
        let temp = TempDir::new().expect("temp dir");
        let done_path = temp.path().join("state").join("done.txt");
        let inaccessible_path = temp.path().join("state").join("inaccessible.txt");
        let persistence = || FileStatePersistence::new(&done_path, &inaccessible_path);

        {
            let mut store = JobStateStore::open(persistence()).expect("open");
            store.mark_done("b-gallery").expect("mark b");
            store.mark_done("a-gallery").expect("mark a");
            store.mark_inaccessible("c-gallery").expect("mark c");
            store.mark_inaccessible("a-gallery").expect("move a");
        }

        let done = fs::read_to_string(&done_path).expect("read done");
        assert_eq!(done, "b-gallery");
        let inaccessible = fs::read_to_string(&inaccessible_path).expect("read inaccessible");
        assert_eq!(inaccessible, "a-gallery\nc-gallery");

        let store = JobStateStore::open(persistence()).expect("reopen");
        assert_eq!(store.state("a-gallery"), JobState::Inaccessible);
        assert_eq!(store.state("b-gallery"), JobState::Done);
        assert_eq!(store.state("c-gallery"), JobState::Inaccessible);
    }

    #[test]
    fn blank_lines_and_whitespace_are_ignored() {
        let temp = TempDir::new().expect("temp dir");
        let done_path = temp.path().join("done.txt");
        fs::write(&done_path, "  first \n\n\nsecond\n").expect("seed done");
        let store = JobStateStore::open(FileStatePersistence::new(
            &done_path,
            temp.path().join("inaccessible.txt"),
        ))
        .expect("open");
        assert!(store.is_done("first"));
        assert!(store.is_done("second"));
        assert!(!store.is_done(""));
    }

    /// In-memory lists whose saves can be made to fail per list.
    #[derive(Default)]
    struct FlakyPersistence {
        inner: InMemoryStatePersistence,
        failing: Mutex<Vec<StateList>>,
        saves: Mutex<Vec<StateList>>,
    }

    impl FlakyPersistence {
        fn fail(&self, lists: &[StateList]) {
            *self.failing.lock().expect("failing lock") = lists.to_vec();
        }

        fn saves(&self) -> Vec<StateList> {
            self.saves.lock().expect("saves lock").clone()
        }
    }

    impl StatePersistence for FlakyPersistence {
        fn load(&self, list: StateList) -> io::Result<Vec<String>> {
            self.inner.load(list)
        }

        fn save(&self, list: StateList, entries: &[String]) -> io::Result<()> {
            if self.failing.lock().expect("failing lock").contains(&list) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.saves.lock().expect("saves lock").push(list);
            self.inner.save(list, entries)
        }
    }

    #[test]
    fn failed_save_leaves_state_unchanged_and_retry_writes() {
        let mut store = JobStateStore::open(FlakyPersistence::default()).expect("open");
        store.persistence().fail(&[StateList::Done]);

        store.mark_done("g").expect_err("save should fail");
        assert!(!store.is_done("g"));
        assert_eq!(store.state("g"), JobState::Unseen);

        store.persistence().fail(&[]);
        store.mark_done("g").expect("retry");
        assert!(store.is_done("g"));
        assert_eq!(
            store.persistence().inner.entries(StateList::Done),
            vec!["g".to_string()]
        );
    }

    #[test]
    fn move_writes_the_left_list_before_the_joined_list() {
        let persistence = FlakyPersistence {
            inner: InMemoryStatePersistence::with_entries(&["g"], &[]),
            ..FlakyPersistence::default()
        };
        let mut store = JobStateStore::open(persistence).expect("open");

        store.mark_inaccessible("g").expect("move");
        assert_eq!(
            store.persistence().saves(),
            vec![StateList::Done, StateList::Inaccessible]
        );
        assert_eq!(store.state("g"), JobState::Inaccessible);
    }

    #[test]
    fn interrupted_move_never_resolves_to_the_older_mark() {
        let persistence = FlakyPersistence {
            inner: InMemoryStatePersistence::with_entries(&["g"], &[]),
            ..FlakyPersistence::default()
        };
        let mut store = JobStateStore::open(persistence).expect("open");
        store.persistence().fail(&[StateList::Inaccessible]);

        store.mark_inaccessible("g").expect_err("joined list fails");
        assert!(!store.is_done("g"));
        assert!(!store.is_inaccessible("g"));
        let inner = &store.persistence().inner;
        assert!(inner.entries(StateList::Done).is_empty());
        assert!(inner.entries(StateList::Inaccessible).is_empty());

        store.persistence().fail(&[]);
        store.mark_inaccessible("g").expect("retry");
        assert_eq!(store.state("g"), JobState::Inaccessible);
        assert_eq!(
            store.persistence().inner.entries(StateList::Inaccessible),
            vec!["g".to_string()]
        );
    }

    #[test]
    fn queries_normalize_ids_like_marks() {
        let mut store = JobStateStore::open(InMemoryStatePersistence::new()).expect("open");
        store.mark_done(" g ").expect("mark done");
        assert!(store.is_done(" g "));
        assert!(store.is_done("g"));
        assert_eq!(store.state("g\n"), JobState::Done);

        store.mark_inaccessible("\th ").expect("mark inaccessible");
        assert!(store.is_inaccessible(" h"));
        assert_eq!(
            store.persistence().entries(StateList::Inaccessible),
            vec!["h".to_string()]
        );
    }
}
