use actix_web::{http::header, web, HttpResponse};
use std::path::Path;

use crate::api::error;
use crate::modules::attachment::storage::LocalAttachmentStorage;

/// Serves a stored attachment by its generated file name.
pub async fn serve_upload(
    name: web::Path<String>,
    storage: web::Data<LocalAttachmentStorage>,
) -> Result<HttpResponse, error::Error> {
    let name = name.into_inner();
    if name.is_empty() || name.starts_with('.') || name.contains("..") || name.contains('\\') {
        return Err(error::Error::not_found("File not found"));
    }

    let path = Path::new(storage.upload_dir()).join(&name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(error::Error::not_found("File not found"));
        }
        Err(e) => return Err(error::SystemError::from(e).into()),
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let mut response = HttpResponse::Ok();
    response
        .insert_header((header::CONTENT_TYPE, mime.essence_str().to_string()))
        .insert_header((header::CACHE_CONTROL, "private, max-age=86400"))
        .insert_header((header::X_CONTENT_TYPE_OPTIONS, "nosniff"));

    // only images render inline; anything else is downloaded
    if mime.type_() != mime_guess::mime::IMAGE {
        response.insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        ));
    }

    Ok(response.body(bytes))
}
