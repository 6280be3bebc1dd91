//! The poll-detect-fetch-apply loop.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wallstream_content_store::{ContentStore, hash_bytes, hash_file, is_valid_digest};
use wallstream_protocol::media::{
    FALLBACK_EXT, ext_for_content_type, is_image_content_type, normalize_ext, sniff_ext,
};

use crate::remote::RemoteSource;
use crate::state::{AgentState, StateError, StateManager};
use crate::upload::{UploadError, Uploader};
use crate::wallpaper::{WallpaperError, WallpaperPort};
use crate::SyncError;

/// Role an engine runs in, with the collaborators that role needs.
#[derive(Clone)]
pub enum Mode {
    /// Follow `publisher_id` and apply its wallpaper locally.
    Subscriber {
        publisher_id: String,
        remote: Arc<dyn RemoteSource>,
    },
    /// Watch the local wallpaper and publish changes through `uploader`.
    Publisher { uploader: Option<Arc<dyn Uploader>> },
}

impl Mode {
    pub fn role(&self) -> &'static str {
        match self {
            Self::Subscriber { .. } => "subscriber",
            Self::Publisher { .. } => "publisher",
        }
    }
}

/// Where the engine is within a tick. Always `Idle` between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Checking,
    Applying,
}

/// Result of one successful tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing changed since the last applied or published hash.
    Unchanged,
    /// The platform cannot report the wallpaper; nothing was done.
    Skipped,
    /// Subscriber applied a new wallpaper.
    Applied { hash: String, path: PathBuf },
    /// Publisher cached (and uploaded, if configured) a new wallpaper.
    Published { hash: String, path: PathBuf },
}

/// Runs one agent role over a content store, a state file and a wallpaper port.
pub struct SyncEngine {
    mode: Mode,
    store: ContentStore,
    states: StateManager,
    wallpaper: Arc<dyn WallpaperPort>,
    state: AgentState,
    phase: Phase,
}

impl SyncEngine {
    /// Creates an engine, loading the persisted state.
    pub fn new(
        mode: Mode,
        store: ContentStore,
        states: StateManager,
        wallpaper: Arc<dyn WallpaperPort>,
    ) -> Result<Self, StateError> {
        let state = states.load()?;
        if !state.is_empty() {
            info!(
                role = mode.role(),
                hash = %state.last_hash,
                path = %state.path.display(),
                "resuming from saved state"
            );
        }
        Ok(Self {
            mode,
            store,
            states,
            wallpaper,
            state,
            phase: Phase::Idle,
        })
    }

    /// Last committed state.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs a single tick. On error the committed state is untouched.
    pub async fn tick(&mut self) -> Result<TickOutcome, SyncError> {
        let result = match self.mode.clone() {
            Mode::Subscriber {
                publisher_id,
                remote,
            } => self.subscriber_tick(&publisher_id, remote.as_ref()).await,
            Mode::Publisher { uploader } => self.publisher_tick(uploader.as_deref()).await,
        };
        self.phase = Phase::Idle;
        result
    }

    /// Ticks every `interval` until `cancel` fires. The first tick runs immediately.
    ///
    /// Tick failures are logged and retried on the next tick.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            role = self.mode.role(),
            interval_secs = interval.as_secs(),
            "sync loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(TickOutcome::Unchanged) => debug!("wallpaper unchanged"),
                Ok(TickOutcome::Skipped) => {}
                Ok(outcome) => debug!(?outcome, "tick complete"),
                Err(e) => warn!(role = self.mode.role(), error = %e, "sync tick failed"),
            }
        }

        info!(role = self.mode.role(), "sync loop stopped");
    }

    async fn subscriber_tick(
        &mut self,
        publisher_id: &str,
        remote: &dyn RemoteSource,
    ) -> Result<TickOutcome, SyncError> {
        self.phase = Phase::Checking;
        let descriptor = remote.fetch_state(publisher_id).await?;
        if !is_valid_digest(&descriptor.hash) {
            return Err(SyncError::InvalidDescriptor(format!(
                "malformed hash {:?}",
                descriptor.hash
            )));
        }
        if descriptor.url.is_empty() {
            return Err(SyncError::InvalidDescriptor("empty url".into()));
        }

        if self.state.matches(&descriptor.hash) {
            if self.state.cached_file_present() {
                return Ok(TickOutcome::Unchanged);
            }
            warn!(
                path = %self.state.path.display(),
                "cached wallpaper is missing, fetching again"
            );
        }

        self.phase = Phase::Applying;
        let download = remote.download(&descriptor.url).await?;
        if !is_image_content_type(&download.content_type) {
            return Err(SyncError::NotImage(download.content_type));
        }
        if download.data.is_empty() {
            return Err(SyncError::EmptyBody);
        }

        let local_hash = hash_bytes(&download.data);
        if !local_hash.eq_ignore_ascii_case(&descriptor.hash) {
            warn!(
                expected = %descriptor.hash,
                actual = %local_hash,
                url = %descriptor.url,
                "downloaded content does not match the published hash"
            );
        }

        let ext = ext_for_content_type(&download.content_type);
        let path = self.store.save(&download.data, &local_hash, ext)?;
        self.wallpaper.set(&path)?;

        let hash = descriptor.hash.to_ascii_lowercase();
        self.commit(&hash, &path)?;
        info!(publisher_id, %hash, path = %path.display(), "wallpaper applied");
        Ok(TickOutcome::Applied { hash, path })
    }

    async fn publisher_tick(
        &mut self,
        uploader: Option<&dyn Uploader>,
    ) -> Result<TickOutcome, SyncError> {
        self.phase = Phase::Checking;
        let current = match self.wallpaper.current() {
            Ok(path) => path,
            Err(WallpaperError::NotSupported) => {
                warn!("reading the current wallpaper is not supported here, skipping");
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let hash = hash_file(&current)?;
        if self.state.matches(&hash) && self.state.cached_file_present() {
            return Ok(TickOutcome::Unchanged);
        }

        self.phase = Phase::Applying;
        let ext = infer_ext(&current)?;
        let path = self.store.save_from_path(&current, &hash, ext)?;
        debug!(source = %current.display(), cached = %path.display(), "wallpaper change detected");

        match uploader {
            Some(_) if ext == FALLBACK_EXT => {
                warn!(
                    source = %current.display(),
                    "wallpaper format is not accepted by the server, keeping it local"
                );
            }
            Some(uploader) => match uploader.upload(&path, &hash).await {
                Ok(()) => {}
                Err(UploadError::Duplicate) => {
                    info!(%hash, "server already has this wallpaper");
                }
                Err(e) if e.is_permanent() => {
                    warn!(%hash, error = %e, "server refused the wallpaper, not retrying");
                }
                Err(e) => return Err(e.into()),
            },
            None => {}
        }

        self.commit(&hash, &path)?;
        info!(%hash, path = %path.display(), "wallpaper published");
        Ok(TickOutcome::Published { hash, path })
    }

    /// Persists the new state, then adopts it.
    fn commit(&mut self, hash: &str, path: &Path) -> Result<(), SyncError> {
        let mut next = AgentState {
            last_hash: hash.to_string(),
            path: path.to_path_buf(),
            timestamp: 0,
        };
        self.states.save(&mut next)?;
        self.state = next;
        Ok(())
    }
}

/// Picks a cache extension from the file's magic bytes, then its name.
fn infer_ext(path: &Path) -> Result<&'static str, SyncError> {
    let mut head = [0u8; 16];
    let mut file = std::fs::File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }

    if let Some(ext) = sniff_ext(&head[..filled]) {
        return Ok(ext);
    }
    Ok(path
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_ext)
        .unwrap_or(FALLBACK_EXT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use wallstream_protocol::PublisherStateDescriptor;

    use crate::remote::{Download, RemoteFuture};
    use crate::upload::UploadFuture;

    const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0 first wallpaper";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n second wallpaper";

    // --- Mocks ---

    #[derive(Default)]
    struct MockWallpaper {
        current: Mutex<Option<PathBuf>>,
        sets: Mutex<Vec<PathBuf>>,
        fail_set: AtomicBool,
    }

    impl MockWallpaper {
        fn showing(path: &Path) -> Self {
            let w = Self::default();
            *w.current.lock().unwrap() = Some(path.to_path_buf());
            w
        }

        fn set_count(&self) -> usize {
            self.sets.lock().unwrap().len()
        }
    }

    impl WallpaperPort for MockWallpaper {
        fn current(&self) -> Result<PathBuf, WallpaperError> {
            self.current
                .lock()
                .unwrap()
                .clone()
                .ok_or(WallpaperError::NotSupported)
        }

        fn set(&self, path: &Path) -> Result<(), WallpaperError> {
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(WallpaperError::Platform("compositor said no".into()));
            }
            self.sets.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    struct MockRemote {
        descriptor: Mutex<PublisherStateDescriptor>,
        content_type: Mutex<String>,
        body: Mutex<Vec<u8>>,
        fetches: AtomicUsize,
        downloads: AtomicUsize,
    }

    impl MockRemote {
        fn serving(content_type: &str, body: &[u8]) -> Self {
            let hash = hash_bytes(body);
            Self {
                descriptor: Mutex::new(PublisherStateDescriptor {
                    url: format!("/files/{hash}.jpg"),
                    hash,
                    timestamp: 1,
                }),
                content_type: Mutex::new(content_type.to_string()),
                body: Mutex::new(body.to_vec()),
                fetches: AtomicUsize::new(0),
                downloads: AtomicUsize::new(0),
            }
        }

        fn publish(&self, content_type: &str, body: &[u8]) {
            let hash = hash_bytes(body);
            *self.descriptor.lock().unwrap() = PublisherStateDescriptor {
                url: format!("/files/{hash}"),
                hash,
                timestamp: 2,
            };
            *self.content_type.lock().unwrap() = content_type.to_string();
            *self.body.lock().unwrap() = body.to_vec();
        }
    }

    impl RemoteSource for MockRemote {
        fn fetch_state<'a>(
            &'a self,
            _publisher_id: &'a str,
        ) -> RemoteFuture<'a, PublisherStateDescriptor> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let descriptor = self.descriptor.lock().unwrap().clone();
            Box::pin(async move { Ok(descriptor) })
        }

        fn download<'a>(&'a self, _url: &'a str) -> RemoteFuture<'a, Download> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let dl = Download {
                content_type: self.content_type.lock().unwrap().clone(),
                data: self.body.lock().unwrap().clone(),
            };
            Box::pin(async move { Ok(dl) })
        }
    }

    /// What the mock uploader answers.
    #[derive(Clone, Copy)]
    enum Reply {
        Ok,
        Duplicate,
        Fail,
        Refused,
    }

    struct MockUploader {
        reply: Mutex<Reply>,
        calls: Mutex<Vec<(PathBuf, String)>>,
    }

    impl MockUploader {
        fn new(reply: Reply) -> Self {
            Self {
                reply: Mutex::new(reply),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Uploader for MockUploader {
        fn upload<'a>(&'a self, path: &'a Path, hash: &'a str) -> UploadFuture<'a> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), hash.to_string()));
            let reply = *self.reply.lock().unwrap();
            Box::pin(async move {
                match reply {
                    Reply::Ok => Ok(()),
                    Reply::Duplicate => Err(UploadError::Duplicate),
                    Reply::Fail => Err(UploadError::Rejected {
                        status: 503,
                        message: "maintenance".into(),
                    }),
                    Reply::Refused => Err(UploadError::Rejected {
                        status: 415,
                        message: "unsupported image type".into(),
                    }),
                }
            })
        }
    }

    // --- Fixture ---

    struct Fixture {
        tmp: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tmp: tempfile::tempdir().unwrap(),
            }
        }

        fn store(&self) -> ContentStore {
            ContentStore::new(self.tmp.path().join("cache"))
        }

        fn states(&self) -> StateManager {
            StateManager::new(&self.tmp.path().join("state")).unwrap()
        }

        fn engine(&self, mode: Mode, wallpaper: Arc<MockWallpaper>) -> SyncEngine {
            SyncEngine::new(mode, self.store(), self.states(), wallpaper).unwrap()
        }

        fn subscriber(&self, remote: &Arc<MockRemote>, wallpaper: &Arc<MockWallpaper>) -> SyncEngine {
            let mode = Mode::Subscriber {
                publisher_id: "desk".into(),
                remote: remote.clone(),
            };
            self.engine(mode, wallpaper.clone())
        }

        fn publisher(
            &self,
            uploader: Option<&Arc<MockUploader>>,
            wallpaper: &Arc<MockWallpaper>,
        ) -> SyncEngine {
            let mode = Mode::Publisher {
                uploader: uploader.map(|u| u.clone() as Arc<dyn Uploader>),
            };
            self.engine(mode, wallpaper.clone())
        }

        fn write(&self, name: &str, data: &[u8]) -> PathBuf {
            let path = self.tmp.path().join(name);
            std::fs::write(&path, data).unwrap();
            path
        }

        fn state_file(&self) -> Option<Vec<u8>> {
            std::fs::read(self.states().path()).ok()
        }
    }

    // --- Subscriber ---

    #[tokio::test]
    async fn subscriber_applies_change_exactly_once() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);

        let hash = hash_bytes(JPEG);
        let outcome = engine.tick().await.unwrap();
        let expected_path = fx.store().entry_path(&hash, "jpg").unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Applied {
                hash: hash.clone(),
                path: expected_path.clone()
            }
        );
        assert_eq!(wallpaper.set_count(), 1);
        assert_eq!(std::fs::read(&expected_path).unwrap(), JPEG);
        assert_eq!(engine.state().last_hash, hash);
        assert_eq!(engine.phase(), Phase::Idle);

        let persisted = fx.states().load().unwrap();
        assert_eq!(persisted.last_hash, hash);
        assert_eq!(persisted.path, expected_path);
    }

    #[tokio::test]
    async fn subscriber_unchanged_hash_is_noop() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);

        engine.tick().await.unwrap();
        let saved = fx.state_file().unwrap();

        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(wallpaper.set_count(), 1, "no set on unchanged hash");
        assert_eq!(remote.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(fx.state_file().unwrap(), saved, "state not rewritten");
    }

    #[tokio::test]
    async fn subscriber_follows_new_publish() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);
        engine.tick().await.unwrap();

        remote.publish("image/png", PNG);
        let h2 = hash_bytes(PNG);
        let outcome = engine.tick().await.unwrap();
        let path = fx.store().entry_path(&h2, "png").unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Applied {
                hash: h2.clone(),
                path: path.clone()
            }
        );
        assert_eq!(wallpaper.set_count(), 2);
        assert_eq!(wallpaper.sets.lock().unwrap()[1], path);
        assert_eq!(fx.states().load().unwrap().last_hash, h2);
    }

    #[tokio::test]
    async fn subscriber_rejects_non_image_payload() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("text/html; charset=utf-8", b"<html>login</html>"));
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);

        let err = engine.tick().await.unwrap_err();
        assert!(matches!(err, SyncError::NotImage(ref ct) if ct.starts_with("text/html")));
        assert_eq!(wallpaper.set_count(), 0);
        assert_eq!(fx.store().size_bytes(), 0, "nothing cached");
        assert!(fx.state_file().is_none(), "state untouched");
        assert!(engine.state().is_empty());
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn subscriber_rejects_empty_body() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/png", b""));
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);

        assert!(matches!(engine.tick().await, Err(SyncError::EmptyBody)));
        assert_eq!(wallpaper.set_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_rejects_malformed_descriptor() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        remote.descriptor.lock().unwrap().hash = "../../etc".into();
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);

        assert!(matches!(
            engine.tick().await,
            Err(SyncError::InvalidDescriptor(_))
        ));
        assert_eq!(remote.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscriber_set_failure_leaves_state_and_retries() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        wallpaper.fail_set.store(true, Ordering::SeqCst);
        let mut engine = fx.subscriber(&remote, &wallpaper);

        assert!(matches!(engine.tick().await, Err(SyncError::Wallpaper(_))));
        assert!(engine.state().is_empty());
        assert!(fx.state_file().is_none());

        wallpaper.fail_set.store(false, Ordering::SeqCst);
        assert!(matches!(
            engine.tick().await.unwrap(),
            TickOutcome::Applied { .. }
        ));
        assert_eq!(wallpaper.set_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_state_survives_restart() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        fx.subscriber(&remote, &wallpaper).tick().await.unwrap();

        let mut restarted = fx.subscriber(&remote, &wallpaper);
        assert_eq!(restarted.state().last_hash, hash_bytes(JPEG));
        assert_eq!(restarted.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(remote.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(wallpaper.set_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_refetches_missing_cache_file() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);
        engine.tick().await.unwrap();

        std::fs::remove_file(&engine.state().path).unwrap();
        assert!(matches!(
            engine.tick().await.unwrap(),
            TickOutcome::Applied { .. }
        ));
        assert_eq!(remote.downloads.load(Ordering::SeqCst), 2);
        assert!(engine.state().cached_file_present());
    }

    #[tokio::test]
    async fn subscriber_caches_under_local_digest_on_mismatch() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let claimed = hash_bytes(b"something else");
        remote.descriptor.lock().unwrap().hash = claimed.clone();
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.subscriber(&remote, &wallpaper);

        let TickOutcome::Applied { hash, path } = engine.tick().await.unwrap() else {
            panic!("expected Applied");
        };
        assert_eq!(hash, claimed);
        assert_eq!(path, fx.store().entry_path(&hash_bytes(JPEG), "jpg").unwrap());
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
    }

    // --- Publisher ---

    #[tokio::test]
    async fn publisher_photo_scenario() {
        let fx = Fixture::new();
        let photo1 = fx.write("photo1.jpg", JPEG);
        let photo2 = fx.write("photo2.png", PNG);
        let wallpaper = Arc::new(MockWallpaper::showing(&photo1));
        let uploader = Arc::new(MockUploader::new(Reply::Ok));
        let mut engine = fx.publisher(Some(&uploader), &wallpaper);

        let h1 = hash_bytes(JPEG);
        let p1 = fx.store().entry_path(&h1, "jpg").unwrap();
        assert_eq!(
            engine.tick().await.unwrap(),
            TickOutcome::Published {
                hash: h1.clone(),
                path: p1.clone()
            }
        );
        assert_eq!(std::fs::read(&p1).unwrap(), JPEG);
        assert_eq!(fx.states().load().unwrap().last_hash, h1);
        assert_eq!(uploader.calls.lock().unwrap()[0], (p1, h1.clone()));

        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(uploader.call_count(), 1);

        *wallpaper.current.lock().unwrap() = Some(photo2);
        let h2 = hash_bytes(PNG);
        let p2 = fx.store().entry_path(&h2, "png").unwrap();
        assert_eq!(
            engine.tick().await.unwrap(),
            TickOutcome::Published {
                hash: h2.clone(),
                path: p2.clone()
            }
        );
        assert!(p2.is_file());
        assert_eq!(fx.states().load().unwrap().last_hash, h2);
        assert_eq!(uploader.call_count(), 2);
        assert_eq!(wallpaper.set_count(), 0, "publisher never sets");
    }

    #[tokio::test]
    async fn publisher_without_uploader_still_caches() {
        let fx = Fixture::new();
        let photo = fx.write("photo1.jpg", JPEG);
        let wallpaper = Arc::new(MockWallpaper::showing(&photo));
        let mut engine = fx.publisher(None, &wallpaper);

        assert!(matches!(
            engine.tick().await.unwrap(),
            TickOutcome::Published { .. }
        ));
        assert!(engine.state().cached_file_present());
    }

    #[tokio::test]
    async fn publisher_duplicate_counts_as_success() {
        let fx = Fixture::new();
        let photo = fx.write("photo1.jpg", JPEG);
        let wallpaper = Arc::new(MockWallpaper::showing(&photo));
        let uploader = Arc::new(MockUploader::new(Reply::Duplicate));
        let mut engine = fx.publisher(Some(&uploader), &wallpaper);

        assert!(matches!(
            engine.tick().await.unwrap(),
            TickOutcome::Published { .. }
        ));
        assert_eq!(engine.state().last_hash, hash_bytes(JPEG));
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(uploader.call_count(), 1, "duplicate is not retried");
    }

    #[tokio::test]
    async fn publisher_upload_failure_retries_next_tick() {
        let fx = Fixture::new();
        let photo = fx.write("photo1.jpg", JPEG);
        let wallpaper = Arc::new(MockWallpaper::showing(&photo));
        let uploader = Arc::new(MockUploader::new(Reply::Fail));
        let mut engine = fx.publisher(Some(&uploader), &wallpaper);

        assert!(matches!(engine.tick().await, Err(SyncError::Upload(_))));
        assert!(engine.state().is_empty());
        assert!(fx.state_file().is_none());

        *uploader.reply.lock().unwrap() = Reply::Ok;
        assert!(matches!(
            engine.tick().await.unwrap(),
            TickOutcome::Published { .. }
        ));
        assert_eq!(uploader.call_count(), 2);
    }

    #[tokio::test]
    async fn publisher_refused_upload_is_committed_once() {
        let fx = Fixture::new();
        let photo = fx.write("photo1.jpg", JPEG);
        let wallpaper = Arc::new(MockWallpaper::showing(&photo));
        let uploader = Arc::new(MockUploader::new(Reply::Refused));
        let mut engine = fx.publisher(Some(&uploader), &wallpaper);

        assert!(matches!(
            engine.tick().await.unwrap(),
            TickOutcome::Published { .. }
        ));
        assert_eq!(engine.state().last_hash, hash_bytes(JPEG));
        assert!(fx.state_file().is_some());

        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(uploader.call_count(), 1);
    }

    #[tokio::test]
    async fn publisher_keeps_unknown_formats_local() {
        let fx = Fixture::new();
        let photo = fx.write("photo.webp", b"RIFF\x00\x00\x00\x00WEBPVP8 ");
        let wallpaper = Arc::new(MockWallpaper::showing(&photo));
        let uploader = Arc::new(MockUploader::new(Reply::Ok));
        let mut engine = fx.publisher(Some(&uploader), &wallpaper);

        match engine.tick().await.unwrap() {
            TickOutcome::Published { path, .. } => {
                assert_eq!(path.extension().unwrap(), "bin");
            }
            other => panic!("expected Published, got {other:?}"),
        }
        assert!(engine.state().cached_file_present());
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(uploader.call_count(), 0);
    }

    #[tokio::test]
    async fn publisher_skips_when_not_supported() {
        let fx = Fixture::new();
        let wallpaper = Arc::new(MockWallpaper::default());
        let mut engine = fx.publisher(None, &wallpaper);

        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Skipped);
        assert!(fx.state_file().is_none());
    }

    #[tokio::test]
    async fn publisher_missing_wallpaper_file_is_error() {
        let fx = Fixture::new();
        let wallpaper = Arc::new(MockWallpaper::showing(&fx.tmp.path().join("deleted.jpg")));
        let mut engine = fx.publisher(None, &wallpaper);

        assert!(matches!(engine.tick().await, Err(SyncError::Store(_))));
        assert!(engine.state().is_empty());
    }

    #[test]
    fn extension_inference_prefers_magic_bytes() {
        let fx = Fixture::new();
        assert_eq!(infer_ext(&fx.write("mislabeled.jpg", PNG)).unwrap(), "png");
        assert_eq!(infer_ext(&fx.write("noext", JPEG)).unwrap(), "jpg");
        assert_eq!(infer_ext(&fx.write("plain.JPEG", b"????")).unwrap(), "jpg");
        assert_eq!(infer_ext(&fx.write("plain.webp", b"????")).unwrap(), "bin");
        assert_eq!(infer_ext(&fx.write("plain", b"")).unwrap(), "bin");
    }

    // --- Run loop ---

    #[tokio::test]
    async fn run_ticks_immediately_and_stops_on_cancel() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        let engine = fx.subscriber(&remote, &wallpaper);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(engine.run(Duration::from_secs(3600), cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while wallpaper.set_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first tick should run immediately");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_does_not_fetch_after_cancel() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("image/jpeg", JPEG));
        let wallpaper = Arc::new(MockWallpaper::default());
        let engine = fx.subscriber(&remote, &wallpaper);
        let cancel = CancellationToken::new();
        cancel.cancel();

        engine.run(Duration::from_millis(10), cancel).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_survives_failing_ticks() {
        let fx = Fixture::new();
        let remote = Arc::new(MockRemote::serving("text/html", b"<html/>"));
        let wallpaper = Arc::new(MockWallpaper::default());
        let engine = fx.subscriber(&remote, &wallpaper);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(engine.run(Duration::from_millis(10), cancel.clone()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.fetches.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop keeps ticking after errors");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
        assert_eq!(wallpaper.set_count(), 0);
    }
}
