//! 按团队隔离的模型与结果存储。

use axum::body::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::atomic::{AtomicFile, is_temp_file_name};
use crate::config::{MODELS_DIR, RESULTS_DIR};
use crate::limited::{CopyError, copy_limited};

#[derive(Clone, Debug)]
pub struct Storage {
    models_root: PathBuf,
    results_root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            models_root: root.join(MODELS_DIR),
            results_root: root.join(RESULTS_DIR),
        }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.models_root).await?;
        fs::create_dir_all(&self.results_root).await
    }

    /// 返回某个团队的存储视图；`team` 必须是已配置的团队名。
    pub fn team(&self, team: &str) -> TeamStore {
        TeamStore {
            models_dir: self.models_root.join(team),
            results_dir: self.results_root.join(team),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TeamStore {
    models_dir: PathBuf,
    results_dir: PathBuf,
}

impl TeamStore {
    /// 以原子替换方式写入模型，超过 `max_bytes` 时保留旧文件。
    pub async fn put_model<R>(
        &self,
        name: &str,
        source: &mut R,
        max_bytes: u64,
    ) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let target = self.model_path(name)?;
        fs::create_dir_all(&self.models_dir).await?;

        let mut atomic = AtomicFile::create(&target).await?;
        match copy_limited(source, atomic.file_mut(), max_bytes).await {
            Ok(written) => {
                atomic.commit().await?;
                Ok(written)
            }
            Err(err) => {
                atomic.discard().await;
                Err(err.into())
            }
        }
    }

    /// 打开模型文件用于下载。
    pub async fn open_model(&self, name: &str) -> Result<(File, std::fs::Metadata), StorageError> {
        let target = self.model_path(name)?;
        let not_found = || StorageError::ModelNotFound(name.to_string());
        let file = match File::open(&target).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        Ok((file, metadata))
    }

    /// 列出模型名，按名称排序；上传中的临时文件不会出现。
    pub async fn list_models(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .stored_files(&self.models_dir)
            .await?
            .into_iter()
            .filter_map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// 删除全部模型，返回删除数量；目录不存在时视为成功。
    pub async fn reset_models(&self) -> Result<usize, StorageError> {
        remove_all(self.stored_files(&self.models_dir).await?).await
    }

    /// 以当前 Unix 秒作为名称写入一条结果记录。
    pub async fn upload_result<R>(
        &self,
        source: &mut R,
        max_bytes: u64,
    ) -> Result<String, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.upload_result_at(source, max_bytes, chrono::Utc::now().timestamp())
            .await
    }

    async fn upload_result_at<R>(
        &self,
        source: &mut R,
        max_bytes: u64,
        timestamp: i64,
    ) -> Result<String, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        fs::create_dir_all(&self.results_dir).await?;

        let mut atomic = AtomicFile::create(&self.results_dir.join(result_file_name(timestamp, 0)))
            .await?;
        let written = match copy_limited(source, atomic.file_mut(), max_bytes).await {
            Ok(written) => written,
            Err(err) => {
                atomic.discard().await;
                return Err(err.into());
            }
        };
        if written == 0 {
            atomic.discard().await;
            return Err(StorageError::EmptyResult);
        }

        let dir = self.results_dir.clone();
        let candidates = (0..u32::MAX).map(move |n| dir.join(result_file_name(timestamp, n)));
        let stored = atomic.commit_new(candidates).await?;
        Ok(stored
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    /// 以 JSON 数组形式逐个拼接结果文件的原始字节。
    pub async fn results_stream(
        &self,
    ) -> Result<BoxStream<'static, io::Result<Bytes>>, StorageError> {
        let files = self.result_files().await?;
        debug!(count = files.len(), "streaming results");

        let elements = stream::unfold((files.into_iter(), true), |(mut files, first)| async move {
            loop {
                let path = files.next()?;
                match File::open(&path).await {
                    Ok(file) => {
                        let separator = if first {
                            Bytes::new()
                        } else {
                            Bytes::from_static(b",")
                        };
                        let element = stream::once(future::ready(Ok::<_, io::Error>(separator)))
                            .chain(ReaderStream::new(file));
                        return Some((element.left_stream(), (files, false)));
                    }
                    // Deleted by a concurrent reset after listing.
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        let failed = stream::once(future::ready(Err::<Bytes, _>(err)));
                        return Some((failed.right_stream(), (Vec::new().into_iter(), false)));
                    }
                }
            }
        })
        .flatten();

        Ok(stream::once(future::ready(Ok::<_, io::Error>(Bytes::from_static(b"["))))
            .chain(elements)
            .chain(stream::once(future::ready(Ok(Bytes::from_static(b"]")))))
            .boxed())
    }

    /// 删除全部结果记录，返回删除数量。
    pub async fn reset_results(&self) -> Result<usize, StorageError> {
        remove_all(self.stored_files(&self.results_dir).await?).await
    }

    /// 清理超过 `ttl` 未修改的上传临时文件（进程中断后的残留）。
    pub async fn remove_stale_temp_files(&self, ttl: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for dir in [&self.models_dir, &self.results_dir] {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !is_temp_file_name(&entry.file_name()) {
                    continue;
                }
                let Ok(modified) = entry.metadata().await.and_then(|meta| meta.modified()) else {
                    continue;
                };
                let Ok(age) = now.duration_since(modified) else {
                    continue;
                };
                if age < ttl {
                    continue;
                }
                let path = entry.path();
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        info!(path = ?path, "removed stale upload temp file");
                        removed += 1;
                    }
                    Err(err) => warn!(path = ?path, error = %err, "failed to remove stale temp file"),
                }
            }
        }
        Ok(removed)
    }

    fn model_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_model_name(name)?;
        Ok(self.models_dir.join(name))
    }

    /// 结果文件按 (时间戳, 序号) 排序。
    async fn result_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut keyed: Vec<((i64, u32), PathBuf)> = self
            .stored_files(&self.results_dir)
            .await?
            .into_iter()
            .filter_map(|path| {
                let key = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(parse_result_file_name);
                key.map(|key| (key, path))
            })
            .collect();
        keyed.sort_by_key(|(key, _)| *key);
        Ok(keyed.into_iter().map(|(_, path)| path).collect())
    }

    async fn stored_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if is_temp_file_name(&entry.file_name()) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

async fn remove_all(files: Vec<PathBuf>) -> Result<usize, StorageError> {
    let mut removed = 0;
    for path in files {
        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

/// 模型名必须是单个普通路径段。
pub fn validate_model_name(name: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| Err(StorageError::InvalidName(format!("Invalid model name: {reason}")));

    if name.trim().is_empty() {
        return invalid("name is empty");
    }
    if name.contains(['/', '\\', '\0']) {
        return invalid("path separators are not allowed");
    }
    if name.contains("..") {
        return invalid("parent directory references are not allowed");
    }
    if name.starts_with('.') {
        return invalid("hidden names are not allowed");
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => invalid("name must be a single path segment"),
    }
}

fn result_file_name(timestamp: i64, sequence: u32) -> String {
    if sequence == 0 {
        format!("{timestamp}.json")
    } else {
        format!("{timestamp}-{sequence}.json")
    }
}

fn parse_result_file_name(name: &str) -> Option<(i64, u32)> {
    let stem = name.strip_suffix(".json")?;
    match stem.split_once('-') {
        Some((timestamp, sequence)) if !timestamp.is_empty() => {
            Some((timestamp.parse().ok()?, sequence.parse().ok()?))
        }
        _ => Some((stem.parse().ok()?, 0)),
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName(String),
    ModelNotFound(String),
    TooLarge(u64),
    EmptyResult,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<CopyError> for StorageError {
    fn from(err: CopyError) -> Self {
        match err {
            CopyError::TooLarge { limit } => StorageError::TooLarge(limit),
            CopyError::Io(err) => StorageError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().join("data"));
        (temp, storage)
    }

    async fn collect_results(team: &TeamStore) -> Vec<u8> {
        let chunks: Vec<io::Result<Bytes>> = team
            .results_stream()
            .await
            .expect("results stream")
            .collect()
            .await;
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[tokio::test]
    async fn model_round_trip_is_isolated_per_team() {
        let (_temp, storage) = make_storage();
        let team1 = storage.team("team1");
        let team2 = storage.team("team2");
        let payload = vec![42u8; 10_000];

        let written = team1
            .put_model("weights.bin", &mut payload.as_slice(), 1024 * 1024)
            .await
            .expect("put model");
        assert_eq!(written, payload.len() as u64);

        let (mut file, metadata) = team1.open_model("weights.bin").await.expect("open");
        assert_eq!(metadata.len(), payload.len() as u64);
        let mut read_back = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut read_back)
            .await
            .expect("read");
        assert_eq!(read_back, payload);

        let missing = team2.open_model("weights.bin").await;
        assert!(matches!(missing, Err(StorageError::ModelNotFound(name)) if name == "weights.bin"));
    }

    #[tokio::test]
    async fn put_model_overwrites_existing() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");
        team.put_model("m", &mut &b"first"[..], 100).await.expect("put");
        team.put_model("m", &mut &b"second"[..], 100).await.expect("put");

        let (mut file, _) = team.open_model("m").await.expect("open");
        let mut content = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut content)
            .await
            .expect("read");
        assert_eq!(content, b"second");
        assert_eq!(team.list_models().await.expect("list"), vec!["m".to_string()]);
    }

    #[tokio::test]
    async fn oversized_model_keeps_previous_version() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");
        team.put_model("m", &mut &b"ok"[..], 4).await.expect("put");

        let result = team.put_model("m", &mut &b"too large"[..], 4).await;
        assert!(matches!(result, Err(StorageError::TooLarge(4))));

        let (mut file, _) = team.open_model("m").await.expect("open");
        let mut content = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut content)
            .await
            .expect("read");
        assert_eq!(content, b"ok");
        let entries = std::fs::read_dir(storage.models_root.join("team1"))
            .expect("read dir")
            .count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn list_and_reset_models() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");
        assert!(team.list_models().await.expect("list").is_empty());

        for name in ["c", "a", "b"] {
            team.put_model(name, &mut &b"x"[..], 10).await.expect("put");
        }
        assert_eq!(team.list_models().await.expect("list"), vec!["a", "b", "c"]);

        assert_eq!(team.reset_models().await.expect("reset"), 3);
        assert!(team.list_models().await.expect("list").is_empty());
        assert_eq!(team.reset_models().await.expect("reset again"), 0);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected_before_io() {
        let (temp, storage) = make_storage();
        let team = storage.team("team1");

        for name in ["../escape", "a/b", "..", ".", "", "a\\b", ".hidden"] {
            let result = team.put_model(name, &mut &b"x"[..], 10).await;
            assert!(
                matches!(result, Err(StorageError::InvalidName(_))),
                "name {name:?} should be rejected"
            );
        }
        assert!(!temp.path().join("data").join("models").exists());
        assert!(!temp.path().join("escape").exists());
    }

    #[tokio::test]
    async fn results_view_is_json_array_in_order() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");
        assert_eq!(collect_results(&team).await, b"[]");

        team.upload_result_at(&mut &br#"{"score":2}"#[..], 100, 200)
            .await
            .expect("upload");
        team.upload_result_at(&mut &br#"{"score":1}"#[..], 100, 100)
            .await
            .expect("upload");

        let body = collect_results(&team).await;
        let value: serde_json::Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(value, serde_json::json!([{ "score": 1 }, { "score": 2 }]));
    }

    #[tokio::test]
    async fn same_second_results_get_suffixes() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");

        let first = team
            .upload_result_at(&mut &b"1"[..], 100, 1700000000)
            .await
            .expect("upload");
        let second = team
            .upload_result_at(&mut &b"2"[..], 100, 1700000000)
            .await
            .expect("upload");
        let third = team
            .upload_result_at(&mut &b"3"[..], 100, 1700000000)
            .await
            .expect("upload");

        assert_eq!(first, "1700000000.json");
        assert_eq!(second, "1700000000-1.json");
        assert_eq!(third, "1700000000-2.json");
        assert_eq!(collect_results(&team).await, b"[1,2,3]");
    }

    #[tokio::test]
    async fn oversized_or_empty_result_is_not_stored() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");

        let result = team.upload_result_at(&mut &b"[1,2,3]"[..], 3, 5).await;
        assert!(matches!(result, Err(StorageError::TooLarge(3))));
        let result = team.upload_result_at(&mut &b""[..], 3, 5).await;
        assert!(matches!(result, Err(StorageError::EmptyResult)));

        assert_eq!(collect_results(&team).await, b"[]");
    }

    #[tokio::test]
    async fn reset_results_is_idempotent() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team3");
        assert_eq!(team.reset_results().await.expect("reset"), 0);

        team.upload_result_at(&mut &b"{}"[..], 10, 1).await.expect("upload");
        team.upload_result_at(&mut &b"{}"[..], 10, 2).await.expect("upload");
        assert_eq!(team.reset_results().await.expect("reset"), 2);
        assert_eq!(collect_results(&team).await, b"[]");
    }

    #[tokio::test]
    async fn stale_temp_files_are_removed() {
        let (_temp, storage) = make_storage();
        let team = storage.team("team1");
        team.put_model("keep", &mut &b"x"[..], 10).await.expect("put");
        let models_dir = storage.models_root.join("team1");
        let leftover = models_dir.join(".keep.tmp.0000");
        std::fs::write(&leftover, b"partial").expect("write leftover");

        assert_eq!(
            team.remove_stale_temp_files(Duration::from_secs(3600))
                .await
                .expect("cleanup"),
            0
        );
        assert!(leftover.exists());

        assert_eq!(
            team.remove_stale_temp_files(Duration::ZERO)
                .await
                .expect("cleanup"),
            1
        );
        assert!(!leftover.exists());
        assert_eq!(team.list_models().await.expect("list"), vec!["keep"]);
    }

    #[test]
    fn result_file_names_parse() {
        assert_eq!(parse_result_file_name("12.json"), Some((12, 0)));
        assert_eq!(parse_result_file_name("12-3.json"), Some((12, 3)));
        assert_eq!(parse_result_file_name("-5.json"), Some((-5, 0)));
        assert_eq!(parse_result_file_name("notes.txt"), None);
        assert_eq!(parse_result_file_name("abc.json"), None);
    }
}
