//! Multipart form data parsing and file upload handling.
//!
//! Parses `multipart/form-data` request bodies using the boundary from the
//! Content-Type header. Parts with a `filename` are files; the rest are text
//! fields. Files stay in memory up to the configured threshold and spill to a
//! temp file beyond it when a temp directory is configured. Per-file size,
//! file count, and total request size are enforced independently, each
//! failing with 413 before the offending bytes are fully read.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use multer::{Constraints, Multipart, SizeLimit};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::bodyparser::BodyParserOptions;
use crate::errors::HttpError;
use crate::types::BoxBody;

/// Where an uploaded file's bytes ended up.
#[derive(Debug)]
pub enum FileStorage {
  /// Kept in memory.
  Memory(Bytes),
  /// Spilled to a temp file at this path.
  TempFile(PathBuf),
}

/// One uploaded file from a multipart request.
#[derive(Debug)]
pub struct UploadedFile {
  /// Form field name the file arrived under.
  pub field: String,
  /// Original file name provided by the client, if any.
  pub filename: Option<String>,
  /// Declared MIME type, if any.
  pub content_type: Option<String>,
  /// Size in bytes.
  pub size: u64,
  /// File content, in memory or on disk.
  pub storage: FileStorage,
}

/// Result of parsing a multipart request: text fields plus files.
#[derive(Debug, Default)]
pub struct MultipartBody {
  /// Text fields by name. Duplicate names resolve last-write-wins.
  pub fields: HashMap<String, String>,
  /// Uploaded files in arrival order.
  pub files: Vec<UploadedFile>,
}

/// Parses the body stream as multipart with the configured limits.
pub(crate) async fn parse(
  body: BoxBody,
  boundary: String,
  opts: &BodyParserOptions,
) -> Result<MultipartBody, HttpError> {
  let constraints = Constraints::new().size_limit(
    SizeLimit::new()
      .whole_stream(opts.max_size as u64)
      .per_field(opts.max_file_size as u64),
  );
  let mut multipart =
    Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

  let mut result = MultipartBody::default();
  while let Some(field) = multipart.next_field().await.map_err(map_multer_error)? {
    let name = field
      .name()
      .ok_or_else(|| HttpError::bad_request("multipart field without a name"))?
      .to_owned();

    if field.file_name().is_some() {
      if result.files.len() >= opts.max_files {
        return Err(HttpError::payload_too_large(format!(
          "too many files, limit is {}",
          opts.max_files
        )));
      }
      result.files.push(read_file(name, field, opts).await?);
    } else {
      let text = field.text().await.map_err(map_multer_error)?;
      result.fields.insert(name, text);
    }
  }
  Ok(result)
}

/// Reads one file part, spilling to disk past the threshold when configured.
async fn read_file(
  field_name: String,
  mut field: multer::Field<'_>,
  opts: &BodyParserOptions,
) -> Result<UploadedFile, HttpError> {
  let filename = field.file_name().map(|s| s.to_owned());
  let content_type = field.content_type().map(|m| m.to_string());

  let mut buf = BytesMut::new();
  let mut spilled: Option<(PathBuf, File)> = None;
  let mut size: u64 = 0;

  while let Some(chunk) = field.chunk().await.map_err(map_multer_error)? {
    size += chunk.len() as u64;
    if size > opts.max_file_size as u64 {
      return Err(HttpError::payload_too_large(format!(
        "file exceeds limit of {} bytes",
        opts.max_file_size
      )));
    }

    match &mut spilled {
      Some((_, file)) => {
        file
          .write_all(&chunk)
          .await
          .map_err(|err| HttpError::internal(format!("upload spill failed: {err}")))?;
      }
      None => {
        buf.extend_from_slice(&chunk);
        if let Some(temp_dir) = &opts.temp_dir {
          if buf.len() > opts.temp_threshold {
            let path = temp_dir.join(format!("upload-{}", Uuid::new_v4()));
            let mut file = File::create(&path)
              .await
              .map_err(|err| HttpError::internal(format!("upload spill failed: {err}")))?;
            file
              .write_all(&buf)
              .await
              .map_err(|err| HttpError::internal(format!("upload spill failed: {err}")))?;
            buf.clear();
            spilled = Some((path, file));
          }
        }
      }
    }
  }

  let storage = match spilled {
    Some((path, mut file)) => {
      file
        .flush()
        .await
        .map_err(|err| HttpError::internal(format!("upload spill failed: {err}")))?;
      FileStorage::TempFile(path)
    }
    None => FileStorage::Memory(buf.freeze()),
  };

  Ok(UploadedFile {
    field: field_name,
    filename,
    content_type,
    size,
    storage,
  })
}

fn map_multer_error(err: multer::Error) -> HttpError {
  match err {
    multer::Error::FieldSizeExceeded { limit, .. } => {
      HttpError::payload_too_large(format!("multipart field exceeds limit of {limit} bytes"))
    }
    multer::Error::StreamSizeExceeded { limit } => {
      HttpError::payload_too_large(format!("multipart body exceeds limit of {limit} bytes"))
    }
    other => HttpError::bad_request(format!("malformed multipart body: {other}")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::Full;

  const BOUNDARY: &str = "nrb-test-boundary";

  fn multipart_payload(parts: &[(&str, Option<&str>, &[u8])]) -> Bytes {
    let mut out = Vec::new();
    for (name, filename, data) in parts {
      out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
      match filename {
        Some(f) => out.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
          )
          .as_bytes(),
        ),
        None => out.extend_from_slice(
          format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        ),
      }
      out.extend_from_slice(data);
      out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Bytes::from(out)
  }

  fn body_of(payload: Bytes) -> BoxBody {
    Full::new(payload).map_err(|e| match e {}).boxed()
  }

  #[tokio::test]
  async fn fields_and_files_are_classified() {
    let payload = multipart_payload(&[
      ("title", None, b"hello"),
      ("avatar", Some("avatar.png"), &[7u8; 1500]),
    ]);
    let parsed = parse(body_of(payload), BOUNDARY.into(), &BodyParserOptions::default())
      .await
      .unwrap();

    assert_eq!(parsed.fields["title"], "hello");
    assert_eq!(parsed.files.len(), 1);
    let file = &parsed.files[0];
    assert_eq!(file.field, "avatar");
    assert_eq!(file.filename.as_deref(), Some("avatar.png"));
    assert_eq!(file.size, 1500);
    match &file.storage {
      FileStorage::Memory(bytes) => assert_eq!(bytes.len(), 1500),
      _ => panic!("expected in-memory storage"),
    }
  }

  #[tokio::test]
  async fn per_file_limit_rejects_with_413() {
    let opts = BodyParserOptions {
      max_file_size: 1024,
      ..Default::default()
    };
    let payload = multipart_payload(&[("avatar", Some("a.bin"), &[0u8; 1500])]);
    let err = parse(body_of(payload), BOUNDARY.into(), &opts)
      .await
      .unwrap_err();
    assert_eq!(err.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
  }

  #[tokio::test]
  async fn file_count_limit_is_enforced() {
    let opts = BodyParserOptions {
      max_files: 1,
      ..Default::default()
    };
    let payload = multipart_payload(&[
      ("one", Some("1.bin"), b"x"),
      ("two", Some("2.bin"), b"y"),
    ]);
    let err = parse(body_of(payload), BOUNDARY.into(), &opts)
      .await
      .unwrap_err();
    assert_eq!(err.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
  }

  #[tokio::test]
  async fn total_size_limit_is_enforced() {
    let opts = BodyParserOptions {
      max_size: 512,
      ..Default::default()
    };
    let payload = multipart_payload(&[("blob", Some("b.bin"), &[1u8; 2048])]);
    let err = parse(body_of(payload), BOUNDARY.into(), &opts)
      .await
      .unwrap_err();
    assert_eq!(err.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
  }

  #[tokio::test]
  async fn unterminated_multipart_is_bad_request() {
    let mut raw = Vec::new();
    raw.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    raw.extend_from_slice(b"Content-Disposition: form-data; name=\"t\"\r\n\r\nvalue");
    // No closing boundary.
    let err = parse(
      body_of(Bytes::from(raw)),
      BOUNDARY.into(),
      &BodyParserOptions::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn large_uploads_spill_to_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let opts = BodyParserOptions {
      temp_dir: Some(dir.path().to_path_buf()),
      temp_threshold: 64,
      ..Default::default()
    };
    let payload = multipart_payload(&[("big", Some("big.bin"), &[9u8; 4096])]);
    let parsed = parse(body_of(payload), BOUNDARY.into(), &opts).await.unwrap();

    let file = &parsed.files[0];
    assert_eq!(file.size, 4096);
    match &file.storage {
      FileStorage::TempFile(path) => {
        let written = std::fs::read(path).unwrap();
        assert_eq!(written.len(), 4096);
      }
      _ => panic!("expected temp-file storage"),
    }
  }
}
