//! 临时文件写入与原子替换。

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp.";

/// A hidden sibling file that replaces its target only on [`AtomicFile::commit`].
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标文件同目录创建隐藏临时文件。
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
        })?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}{TEMP_MARKER}{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃写入并删除临时文件。
    pub async fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 落盘后以 rename 覆盖目标文件。
    pub async fn commit(self) -> io::Result<()> {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok()
                    && fs::rename(&self.temp_path, &self.target).await.is_ok()
                {
                    let _ = sync_parent(&self.target).await;
                    return Ok(());
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        let _ = sync_parent(&self.target).await;
        Ok(())
    }

    /// 落盘后链接到第一个尚不存在的候选路径，绝不覆盖已有文件。
    pub async fn commit_new<I>(self, candidates: I) -> io::Result<PathBuf>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        let mut outcome = Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free target name",
        ));
        for candidate in candidates {
            match fs::hard_link(&self.temp_path, &candidate).await {
                Ok(()) => {
                    outcome = Ok(candidate);
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        let _ = fs::remove_file(&self.temp_path).await;
        if let Ok(path) = &outcome {
            let _ = sync_parent(path).await;
        }
        outcome
    }
}

/// 判断文件名是否为上传中的临时文件。
pub fn is_temp_file_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

async fn sync_parent(target: &Path) -> io::Result<()> {
    let Some(parent) = target.parent() else {
        return Ok(());
    };
    let parent = parent.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(parent)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
