use std::fs::Metadata;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};

use crate::config::ARCHIVE_DIR;
use crate::error::StorageError;
use crate::guard::is_hidden;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    /// 由已校验的片段拼出存储路径；片段必须是单个普通路径组件。
    pub fn resolve(&self, segments: &[&str]) -> Result<PathBuf, StorageError> {
        let mut target = self.root.clone();
        for segment in segments {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(part)), None) => target.push(part),
                (Some(Component::CurDir), None) => continue,
                _ => return Err(StorageError::InvalidPath),
            }
        }
        Ok(target)
    }

    pub fn directory_path(&self, directory: Option<&str>) -> Result<PathBuf, StorageError> {
        match directory {
            Some(directory) => self.resolve(&[directory]),
            None => Ok(self.root.clone()),
        }
    }

    /// 列出目录下的直接子项名称（隐藏项除外），按名称排序。
    pub async fn list_dir(&self, directory: Option<&str>) -> Result<Vec<String>, StorageError> {
        let target = self.directory_path(directory)?;
        let mut dir = fs::read_dir(&target).await?;
        let mut names = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_hidden(&name) {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    /// 若目录不存在则创建，返回其路径。
    pub async fn ensure_dir(&self, directory: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(&[directory])?;
        fs::create_dir_all(&target).await?;
        Ok(target)
    }

    pub async fn delete_file(&self, directory: &str, file: &str) -> Result<(), StorageError> {
        let target = self.resolve(&[directory, file])?;
        fs::remove_file(target).await?;
        Ok(())
    }

    /// 打开普通文件；目录按不存在处理。
    pub async fn open_file(
        &self,
        directory: &str,
        file: &str,
    ) -> Result<(File, Metadata), StorageError> {
        let target = self.resolve(&[directory, file])?;
        let metadata = fs::metadata(&target).await?;
        if !metadata.is_file() {
            return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
        }
        let file = File::open(&target).await?;
        Ok((file, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use crate::error::StorageError;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Storage::new(root))
    }

    #[test]
    fn resolve_rejects_compound_segments() {
        let (_temp, storage) = make_storage();
        assert!(matches!(
            storage.resolve(&["a/b"]),
            Err(StorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve(&[".."]),
            Err(StorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.resolve(&["/etc"]),
            Err(StorageError::InvalidPath)
        ));
        assert_eq!(
            storage.resolve(&["docs", "x.txt"]).expect("resolve"),
            storage.root_path().join("docs").join("x.txt")
        );
    }

    #[tokio::test]
    async fn list_dir_hides_dot_entries_and_sorts() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join("b.txt"), b"b").expect("write");
        std::fs::write(root.join("a.txt"), b"a").expect("write");
        std::fs::write(root.join(".hidden"), b"h").expect("write");
        std::fs::create_dir(root.join("docs")).expect("mkdir");

        let names = storage.list_dir(None).await.expect("list");
        assert_eq!(names, vec!["a.txt", "b.txt", "docs"]);
    }

    #[tokio::test]
    async fn list_missing_directory_is_not_found() {
        let (_temp, storage) = make_storage();
        let result = storage.list_dir(Some("absent")).await;
        assert!(matches!(result, Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn open_file_treats_directory_as_missing() {
        let (_temp, storage) = make_storage();
        std::fs::create_dir_all(storage.root_path().join("docs/inner")).expect("mkdir");
        let result = storage.open_file("docs", "inner").await;
        assert!(matches!(result, Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn delete_file_removes_only_target() {
        let (_temp, storage) = make_storage();
        let dir = storage.ensure_dir("docs").await.expect("ensure dir");
        std::fs::write(dir.join("keep.txt"), b"k").expect("write");
        std::fs::write(dir.join("drop.txt"), b"d").expect("write");

        storage.delete_file("docs", "drop.txt").await.expect("delete");
        assert!(!dir.join("drop.txt").exists());
        assert!(dir.join("keep.txt").exists());

        let again = storage.delete_file("docs", "drop.txt").await;
        assert!(matches!(again, Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound));
    }
}
