//! 上传、删除、列表、读取与备份处理器。
//!
//! 每个处理器按固定顺序执行检查：认证、路径片段、业务校验，然后访问文件系统。

use axum::body::Body as AxumBody;
use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Extension, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::Serialize;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::atomic::AtomicFile;
use crate::auth::Authenticator;
use crate::backup::{BackupJob, BackupRunner};
use crate::config::{ARCHIVE_DIR, ARCHIVE_EXTENSION, RESERVED_DIRECTORIES};
use crate::error::{ApiError, PlainError, StorageError};
use crate::guard::{HotlinkGuard, ensure_safe_segment, is_hidden, is_unsafe_segment};
use crate::http::{PublicUrl, header_str};
use crate::naming::allocate_name;
use crate::quota::{QuotaMonitor, QuotaTier};
use crate::storage::Storage;

const UPLOAD_FIELD: &str = "file";

#[derive(Serialize)]
pub struct UploadResponse {
    success: bool,
    message: &'static str,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<&'static str>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    success: bool,
    message: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse {
    success: bool,
    message: &'static str,
    list: Vec<String>,
}

#[derive(Serialize)]
pub struct BackupResponse {
    success: bool,
    url: String,
    message: &'static str,
}

/// 上传单个文件到 `directory`，文件名随机分配。
pub async fn upload(
    Path(directory): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<Arc<Authenticator>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(quota): Extension<Arc<QuotaMonitor>>,
    Extension(urls): Extension<Arc<PublicUrl>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    auth.authorize(&headers)?;
    ensure_safe_segment(&directory)?;
    if is_hidden(&directory) || RESERVED_DIRECTORIES.contains(&directory.as_str()) {
        return Err(ApiError::BadRequest("invalid directory".into()));
    }
    let mut multipart =
        multipart.map_err(|err| ApiError::BadRequest(format!("invalid multipart body: {err}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("invalid file".into()))?;

        let (tier, usage_mib) = quota
            .check()
            .await
            .map_err(|err| ApiError::Internal(format!("quota scan failed: {err}")))?;
        if tier == QuotaTier::Block {
            warn!(usage_mib, "upload rejected, storage quota exceeded");
            return Err(ApiError::QuotaExceeded);
        }

        let extension = extension_of(&filename);
        if is_unsafe_segment(&extension) {
            return Err(ApiError::BadRequest("invalid file".into()));
        }

        let target_dir = storage.directory_path(Some(&directory))?;
        let name = allocate_name(&target_dir, &extension)
            .await
            .map_err(|err| ApiError::Internal(format!("name allocation failed: {err}")))?;
        storage.ensure_dir(&directory).await?;

        let file_name = format!("{name}{extension}");
        let size = persist_field(field, &target_dir.join(&file_name)).await?;
        let url = urls.file(&directory, &file_name);

        let warning = (tier == QuotaTier::Warn).then(|| {
            warn!(usage_mib, "storage usage above warning threshold");
            "storage usage has reached the warning threshold"
        });
        info!(directory, file = file_name, size, url, "upload saved");
        return Ok(JsonResponse(UploadResponse {
            success: true,
            message: "saved",
            url,
            warning,
        }));
    }

    Err(ApiError::BadRequest("missing file".into()))
}

/// 原始文件名的后缀（含前导点），没有后缀时为空串。
fn extension_of(filename: &str) -> String {
    FsPath::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

async fn persist_field(mut field: Field<'_>, target: &FsPath) -> Result<u64, ApiError> {
    let mut atomic = AtomicFile::new(target)
        .await
        .map_err(|err| ApiError::Internal(format!("create temp file failed: {err}")))?;

    let write_result: Result<u64, ApiError> = async {
        let mut written = 0u64;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| ApiError::BadRequest(format!("upload interrupted: {err}")))?
        {
            written += chunk.len() as u64;
            atomic
                .file_mut()
                .write_all(&chunk)
                .await
                .map_err(|err| ApiError::Internal(format!("write failed: {err}")))?;
        }
        Ok(written)
    }
    .await;

    match write_result {
        Ok(written) => {
            atomic
                .finalize()
                .await
                .map_err(|err| ApiError::Internal(format!("finalize failed: {err}")))?;
            Ok(written)
        }
        Err(err) => {
            atomic.cleanup().await;
            Err(err)
        }
    }
}

/// 删除单个文件。
pub async fn delete_file(
    Path((directory, file)): Path<(String, String)>,
    headers: HeaderMap,
    Extension(auth): Extension<Arc<Authenticator>>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<MessageResponse>, ApiError> {
    auth.authorize(&headers)?;
    ensure_safe_segment(&directory)?;
    ensure_safe_segment(&file)?;

    storage.delete_file(&directory, &file).await?;
    info!(directory, file, "file deleted");
    Ok(JsonResponse(MessageResponse {
        success: true,
        message: "deleted",
    }))
}

pub async fn list_root(
    headers: HeaderMap,
    Extension(auth): Extension<Arc<Authenticator>>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<ListResponse>, ApiError> {
    list_entries(None, &headers, &auth, &storage).await
}

pub async fn list_directory(
    Path(directory): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<Arc<Authenticator>>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<ListResponse>, ApiError> {
    list_entries(Some(&directory), &headers, &auth, &storage).await
}

async fn list_entries(
    directory: Option<&str>,
    headers: &HeaderMap,
    auth: &Authenticator,
    storage: &Storage,
) -> Result<JsonResponse<ListResponse>, ApiError> {
    auth.authorize(headers)?;
    if let Some(directory) = directory {
        ensure_safe_segment(directory)?;
    }

    let list = storage.list_dir(directory).await?;
    info!(
        directory = directory.unwrap_or(""),
        count = list.len(),
        "list directory"
    );
    Ok(JsonResponse(ListResponse {
        success: true,
        message: "ok",
        list,
    }))
}

/// 公开读取文件，不需要认证，只受防盗链与随机文件名保护。
pub async fn retrieve(
    Path((directory, file)): Path<(String, String)>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(hotlink): Extension<Arc<HotlinkGuard>>,
) -> Result<Response, PlainError> {
    ensure_safe_segment(&directory)?;
    ensure_safe_segment(&file)?;
    if is_hidden(&directory) || is_hidden(&file) {
        return Err(ApiError::NotFound.into());
    }
    if !hotlink.allows(header_str(&headers, header::REFERER)) {
        warn!(directory, file, "hotlink rejected");
        return Err(ApiError::Forbidden.into());
    }

    let (handle, metadata) = storage.open_file(&directory, &file).await?;
    let mime = mime_guess::from_path(&file).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Some(value) = metadata
        .modified()
        .ok()
        .and_then(|modified| HeaderValue::from_str(&fmt_http_date(modified)).ok())
    {
        response_headers.insert(header::LAST_MODIFIED, value);
    }

    info!(directory, file, size = metadata.len(), "serve file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(handle)),
    )
        .into_response())
}

pub async fn backup_root(
    headers: HeaderMap,
    Extension(auth): Extension<Arc<Authenticator>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(urls): Extension<Arc<PublicUrl>>,
    Extension(runner): Extension<Arc<BackupRunner>>,
) -> Result<Response, ApiError> {
    start_backup(None, &headers, &auth, &storage, &urls, &runner).await
}

pub async fn backup_directory(
    Path(directory): Path<String>,
    headers: HeaderMap,
    Extension(auth): Extension<Arc<Authenticator>>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(urls): Extension<Arc<PublicUrl>>,
    Extension(runner): Extension<Arc<BackupRunner>>,
) -> Result<Response, ApiError> {
    start_backup(Some(&directory), &headers, &auth, &storage, &urls, &runner).await
}

/// 派发归档任务并立即返回 202；响应不反映任务最终结果。
///
/// 认证在这里是强制的：任何人都能触发整个存储的归档是不可接受的。
async fn start_backup(
    directory: Option<&str>,
    headers: &HeaderMap,
    auth: &Authenticator,
    storage: &Storage,
    urls: &PublicUrl,
    runner: &BackupRunner,
) -> Result<Response, ApiError> {
    auth.authorize(headers)?;
    if let Some(directory) = directory {
        ensure_safe_segment(directory)?;
    }

    let source = storage.directory_path(directory)?;
    let metadata = tokio::fs::metadata(&source)
        .await
        .map_err(StorageError::from)?;
    if !metadata.is_dir() {
        return Err(ApiError::NotFound);
    }

    let archive_dir = storage.archive_dir();
    tokio::fs::create_dir_all(&archive_dir)
        .await
        .map_err(|err| ApiError::Internal(format!("create archive directory failed: {err}")))?;
    let name = allocate_name(&archive_dir, ARCHIVE_EXTENSION)
        .await
        .map_err(|err| ApiError::Internal(format!("name allocation failed: {err}")))?;
    let file_name = format!("{name}{ARCHIVE_EXTENSION}");
    let destination = archive_dir.join(&file_name);
    let url = urls.file(ARCHIVE_DIR, &file_name);

    runner.dispatch(BackupJob::new(source, destination).excluding(archive_dir));
    info!(directory = directory.unwrap_or(""), url, "backup dispatched");

    Ok((
        StatusCode::ACCEPTED,
        JsonResponse(BackupResponse {
            success: true,
            url,
            message: "backup started",
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use tempfile::tempdir;

    const ABC123_SHA256: &str = "6ca13d52ca70c883e0f0bb101e425a89e8624de51db2d2392593af6a84118090";

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Arc::new(Storage::new(root)))
    }

    fn make_auth() -> Arc<Authenticator> {
        Arc::new(Authenticator::new(
            &AuthConfig {
                from_env: None,
                hashed: Some(ABC123_SHA256.into()),
            },
            None,
        ))
    }

    fn authorized() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        headers
    }

    #[test]
    fn extension_keeps_leading_dot() {
        assert_eq!(extension_of("photo.JPG"), ".JPG");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of(".bashrc"), "");
        assert_eq!(extension_of("trailing."), "");
    }

    #[tokio::test]
    async fn delete_requires_auth() {
        let (_temp, storage) = make_storage();
        let result = delete_file(
            Path(("docs".into(), "a.txt".into())),
            HeaderMap::new(),
            Extension(make_auth()),
            Extension(storage),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn delete_rejects_traversal_in_either_segment() {
        let (_temp, storage) = make_storage();
        for (directory, file) in [("..", "x"), ("docs", "../x"), ("a\\b", "x")] {
            let result = delete_file(
                Path((directory.into(), file.into())),
                authorized(),
                Extension(make_auth()),
                Extension(storage.clone()),
            )
            .await;
            assert!(matches!(result, Err(ApiError::Forbidden)));
        }
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let (_temp, storage) = make_storage();
        let result = delete_file(
            Path(("docs".into(), "absent.txt".into())),
            authorized(),
            Extension(make_auth()),
            Extension(storage),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn list_missing_directory_is_not_found() {
        let (_temp, storage) = make_storage();
        let result = list_directory(
            Path("absent".into()),
            authorized(),
            Extension(make_auth()),
            Extension(storage),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn retrieve_hides_dot_entries() {
        let (_temp, storage) = make_storage();
        let dir = storage.ensure_dir("docs").await.expect("mkdir");
        std::fs::write(dir.join(".secret"), b"s").expect("write");

        let result = retrieve(
            Path(("docs".into(), ".secret".into())),
            HeaderMap::new(),
            Extension(storage),
            Extension(Arc::new(HotlinkGuard::new(false, &[]))),
        )
        .await;
        assert!(matches!(result, Err(PlainError(ApiError::NotFound))));
    }

    #[tokio::test]
    async fn retrieve_enforces_hotlink_whitelist() {
        let (_temp, storage) = make_storage();
        let dir = storage.ensure_dir("docs").await.expect("mkdir");
        std::fs::write(dir.join("a.txt"), b"a").expect("write");
        let guard = Arc::new(HotlinkGuard::new(
            true,
            &[r"https://example\.com".to_string()],
        ));

        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, HeaderValue::from_static("https://evil.com"));
        let denied = retrieve(
            Path(("docs".into(), "a.txt".into())),
            headers,
            Extension(storage.clone()),
            Extension(guard.clone()),
        )
        .await;
        assert!(matches!(denied, Err(PlainError(ApiError::Forbidden))));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://example.com"),
        );
        let allowed = retrieve(
            Path(("docs".into(), "a.txt".into())),
            headers,
            Extension(storage),
            Extension(guard),
        )
        .await
        .expect("allowed");
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(
            allowed.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
    }

    #[tokio::test]
    async fn backup_requires_auth() {
        let (_temp, storage) = make_storage();
        let result = backup_root(
            HeaderMap::new(),
            Extension(make_auth()),
            Extension(storage),
            Extension(Arc::new(PublicUrl::default())),
            Extension(Arc::new(BackupRunner::new(1))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn backup_missing_directory_is_not_found() {
        let (_temp, storage) = make_storage();
        let result = backup_directory(
            Path("absent".into()),
            authorized(),
            Extension(make_auth()),
            Extension(storage),
            Extension(Arc::new(PublicUrl::default())),
            Extension(Arc::new(BackupRunner::new(1))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn backup_of_plain_file_is_not_found() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("note.txt"), b"n").expect("write");
        let result = backup_directory(
            Path("note.txt".into()),
            authorized(),
            Extension(make_auth()),
            Extension(storage),
            Extension(Arc::new(PublicUrl::default())),
            Extension(Arc::new(BackupRunner::new(1))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn backup_source_io_failure_is_internal() {
        let (_temp, storage) = make_storage();
        // 超过文件系统单个名称长度上限，stat 返回的不是 NotFound。
        let result = backup_directory(
            Path("d".repeat(300)),
            authorized(),
            Extension(make_auth()),
            Extension(storage),
            Extension(Arc::new(PublicUrl::default())),
            Extension(Arc::new(BackupRunner::new(1))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }
}
