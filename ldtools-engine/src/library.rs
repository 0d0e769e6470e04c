use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ldtools_config::LibraryConfig;
use ldtools_core::document::Page;
use ldtools_core::target::normalize_name;
use ldtools_io::parse_document_named;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to read library file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse library file {name}: {message}")]
    Parse { name: String, message: String },
}

/// 按名称提供库文件文本。找不到返回 `Ok(None)`，只有真正的 I/O 故障才是错误。
pub trait LibrarySource: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<String>, LibraryError>;
}

/// 共享的来源：监视线程持有同一个来源并在通知前更新它。
impl<S: LibrarySource + ?Sized> LibrarySource for Arc<S> {
    fn read(&self, name: &str) -> Result<Option<String>, LibraryError> {
        (**self).read(name)
    }
}

/// 磁盘上的库：依次在每个根目录的各个搜索子目录中查找，文件名不区分大小写。
#[derive(Debug, Clone)]
pub struct DirectorySource {
    roots: Vec<PathBuf>,
    search_folders: Vec<String>,
}

impl DirectorySource {
    pub fn new(roots: Vec<PathBuf>, search_folders: Vec<String>) -> Self {
        Self {
            roots,
            search_folders,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(config.roots.clone(), config.search_folders.clone())
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let components: Vec<&str> = name
            .split(['\\', '/'])
            .filter(|component| !component.is_empty())
            .collect();
        if components.is_empty() {
            return None;
        }
        for root in &self.roots {
            for folder in &self.search_folders {
                let base = if folder.is_empty() {
                    root.clone()
                } else {
                    match find_entry(root, folder) {
                        Some(path) => path,
                        None => continue,
                    }
                };
                if let Some(path) = find_nested(&base, &components) {
                    return Some(path);
                }
            }
        }
        None
    }
}

fn find_entry(directory: &Path, name: &str) -> Option<PathBuf> {
    let exact = directory.join(name);
    if exact.exists() {
        return Some(exact);
    }
    fs::read_dir(directory)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|entry| entry.path())
}

fn find_nested(base: &Path, components: &[&str]) -> Option<PathBuf> {
    let mut current = base.to_path_buf();
    for component in components {
        current = find_entry(&current, component)?;
    }
    current.is_file().then_some(current)
}

impl LibrarySource for DirectorySource {
    fn read(&self, name: &str) -> Result<Option<String>, LibraryError> {
        let Some(path) = self.locate(name) else {
            return Ok(None);
        };
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| LibraryError::Io { path, source })
    }
}

/// 内存中的库，便于嵌入与测试。
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<FxHashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, text: impl Into<String>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_name(name), text.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalize_name(name))
            .is_some()
    }
}

impl LibrarySource for MemorySource {
    fn read(&self, name: &str) -> Result<Option<String>, LibraryError> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_name(name))
            .cloned())
    }
}

/// 库文件的变化类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEvent {
    /// 规范化后的目标名。
    pub name: String,
    pub kind: ChangeKind,
}

/// 库查询结果；找不到与无法加载都是普通结果。
#[derive(Debug, Clone)]
pub enum LibraryLookup {
    Found(Arc<Page>),
    NotFound,
    Unloadable,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Loaded(Arc<Page>),
    NotFound,
    Unloadable,
}

struct Subscriber {
    sender: SyncSender<LibraryEvent>,
    lagged: Arc<AtomicBool>,
}

/// 库页面缓存。多个文档可并发读取，监视线程通过 [`Library::notify`] 更新。
pub struct Library {
    source: Box<dyn LibrarySource>,
    cache: RwLock<FxHashMap<String, CacheEntry>>,
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    generation: AtomicU64,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("capacity", &self.capacity)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Library {
    pub fn new(source: impl LibrarySource + 'static, capacity: usize) -> Self {
        Self {
            source: Box::new(source),
            cache: RwLock::new(FxHashMap::default()),
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(DirectorySource::from_config(config), config.event_capacity)
    }

    /// 每次变更通知递增；缓存快照可据此判断是否过期。
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// 按名称查找库页面，结果（包括找不到）会被缓存直到收到对应通知。
    pub fn lookup(&self, name: &str) -> LibraryLookup {
        let key = normalize_name(name);
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = cache.get(&key) {
                return entry.to_lookup();
            }
        }

        debug!(file = %key, "库缓存未命中");
        let entry = self.load(name);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // 并发加载时保留先写入者，保证同一名称只有一个共享页面。
        cache.entry(key).or_insert(entry).to_lookup()
    }

    fn load(&self, name: &str) -> CacheEntry {
        let text = match self.source.read(name) {
            Ok(Some(text)) => text,
            Ok(None) => return CacheEntry::NotFound,
            Err(error) => {
                warn!(file = name, error = %error, "读取库文件失败");
                return CacheEntry::Unloadable;
            }
        };
        match parse_library_page(name, &text) {
            Ok(page) => CacheEntry::Loaded(Arc::new(page)),
            Err(error) => {
                warn!(file = name, error = %error, "库文件无法解析");
                CacheEntry::Unloadable
            }
        }
    }

    /// 清除缓存条目并把变化转发给所有订阅者。可在任意线程调用。
    pub fn notify(&self, name: &str, kind: ChangeKind) {
        let key = normalize_name(name);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(file = %key, ?kind, "库文件变化");

        let event = LibraryEvent { name: key, kind };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !subscriber.lagged.swap(true, Ordering::AcqRel) {
                    warn!(file = %event.name, "库事件通道已满，订阅者将整体重新解析");
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// 订阅变化通知。通道有界；溢出时订阅被标记为滞后。
    pub fn subscribe(&self) -> LibrarySubscription {
        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        let lagged = Arc::new(AtomicBool::new(false));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                sender,
                lagged: Arc::clone(&lagged),
            });
        LibrarySubscription { receiver, lagged }
    }
}

impl CacheEntry {
    fn to_lookup(&self) -> LibraryLookup {
        match self {
            CacheEntry::Loaded(page) => LibraryLookup::Found(Arc::clone(page)),
            CacheEntry::NotFound => LibraryLookup::NotFound,
            CacheEntry::Unloadable => LibraryLookup::Unloadable,
        }
    }
}

/// 库文件解析为冻结页面；文件里没有 `0 Name:` 时用请求的名称。
fn parse_library_page(name: &str, text: &str) -> Result<Page, LibraryError> {
    let parse_error = |message: String| LibraryError::Parse {
        name: name.to_string(),
        message,
    };
    let mut document =
        parse_document_named(text, Some(name)).map_err(|error| parse_error(error.to_string()))?;
    let id = document
        .pages()
        .first()
        .map(Page::id)
        .ok_or_else(|| parse_error("文件中没有页面".to_string()))?;
    let (_, mut page) = document
        .remove_page(id)
        .map_err(|error| parse_error(error.to_string()))?;
    page.freeze();
    Ok(page)
}

/// 一次排空的结果。
#[derive(Debug, Default)]
pub struct LibraryDrain {
    pub events: Vec<LibraryEvent>,
    /// 通道曾经溢出，部分事件已丢失。
    pub lagged: bool,
}

impl LibraryDrain {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && !self.lagged
    }
}

#[derive(Debug)]
pub struct LibrarySubscription {
    receiver: Receiver<LibraryEvent>,
    lagged: Arc<AtomicBool>,
}

impl LibrarySubscription {
    /// 在文档线程上取出所有待处理事件。
    pub fn drain(&self) -> LibraryDrain {
        let mut drain = LibraryDrain::default();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => drain.events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        drain.lagged = self.lagged.swap(false, Ordering::AcqRel);
        drain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const BRICK: &str = "0 Brick\n0 Name: 3001.dat\n0 !LDRAW_ORG Part UPDATE 2004-01\n3 16 0 0 0 1 0 0 0 0 1\n";

    #[test]
    fn lookups_are_cached_and_frozen() {
        let source = MemorySource::new();
        source.insert("3001.dat", BRICK);
        let library = Library::new(source, 8);

        let LibraryLookup::Found(first) = library.lookup("3001.DAT") else {
            panic!("expected library page");
        };
        assert!(first.is_frozen());
        assert_eq!(first.target_name(), "3001.dat");
        let LibraryLookup::Found(second) = library.lookup("3001.dat") else {
            panic!("expected cached page");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(library.lookup("missing.dat"), LibraryLookup::NotFound));
    }

    #[test]
    fn unparsable_files_are_unloadable() {
        let source = MemorySource::new();
        source.insert("broken.dat", "7 garbage\n");
        let library = Library::new(source, 8);
        assert!(matches!(library.lookup("broken.dat"), LibraryLookup::Unloadable));
    }

    #[test]
    fn notify_invalidates_and_fans_out() {
        let library = Library::new(MemorySource::new(), 8);
        let subscription = library.subscribe();
        assert!(matches!(library.lookup("3001.dat"), LibraryLookup::NotFound));

        let before = library.generation();
        library.notify("3001.DAT", ChangeKind::Added);
        assert_eq!(library.generation(), before + 1);

        let drain = subscription.drain();
        assert_eq!(
            drain.events,
            vec![LibraryEvent {
                name: "3001.dat".to_string(),
                kind: ChangeKind::Added
            }]
        );
        assert!(!drain.lagged);
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn overflowing_subscribers_are_marked_lagged() {
        let library = Arc::new(Library::new(MemorySource::new(), 2));
        let subscription = library.subscribe();
        let watcher = {
            let library = Arc::clone(&library);
            thread::spawn(move || {
                for index in 0..5 {
                    library.notify(&format!("{index}.dat"), ChangeKind::Updated);
                }
            })
        };
        watcher.join().unwrap();
        let drain = subscription.drain();
        assert_eq!(drain.events.len(), 2);
        assert!(drain.lagged);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let library = Library::new(MemorySource::new(), 1);
        drop(library.subscribe());
        library.notify("a.dat", ChangeKind::Removed);
        assert!(library.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn directory_source_matches_case_insensitively() {
        let root = tempfile::tempdir().unwrap();
        let parts = root.path().join("PARTS").join("s");
        fs::create_dir_all(&parts).unwrap();
        fs::write(parts.join("3001S01.DAT"), "0 Name: s\\3001s01.dat\n").unwrap();
        fs::write(root.path().join("model.ldr"), "0 Name: model.ldr\n").unwrap();

        let source = DirectorySource::new(
            vec![root.path().to_path_buf()],
            vec!["parts".to_string(), String::new()],
        );
        assert!(source.read("s\\3001s01.dat").unwrap().is_some());
        assert!(source.read("S/3001S01.dat").unwrap().is_some());
        assert!(source.read("model.ldr").unwrap().is_some());
        assert!(source.read("3002.dat").unwrap().is_none());
    }
}
