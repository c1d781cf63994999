//! Reusable file-transfer routes: directory listing, size query, streamed
//! download and upload.

use crate::file::{Args, File};
use crate::http::routing::Json;
use crate::http::{arg, Error, Http, ResponseWriter, Result};
use crate::stream::Stream;

/// Register `GET /ls`, `GET /file_size`, `GET /download` and `PUT /upload`.
pub fn register_file_routes(app: &mut Http) {
    app.get("/ls", (arg::arg::<String>("path"),), ls);
    app.get("/file_size", (arg::arg::<String>("filename"),), file_size);
    app.get("/download", (arg::arg::<String>("filename"), arg::response()), download);
    app.put("/upload", (arg::arg::<String>("filename"), arg::body_stream()), upload);
}

fn ls(path: String) -> Result<Json<Vec<String>>> {
    let dir = std::path::Path::new(&path);
    if !dir.is_dir() {
        return Err(Error::new(400, format!("`{path}` is not a directory")));
    }

    let mut items = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| Error::new(500, e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::new(500, e.to_string()))?;
        items.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(Json(items))
}

fn file_size(filename: String) -> Result<Json<u64>> {
    let file = File::open(Args { path: filename, mode: String::new() })?;
    Ok(Json(file.file_size()?))
}

fn download(filename: String, mut res: ResponseWriter) -> Result<ResponseWriter> {
    let content_type = mime_guess::from_path(&filename)
        .first_raw()
        .unwrap_or("application/octet-stream");
    let file = File::open(Args { path: filename, mode: String::new() })?;

    res.headers.insert("Content-Type", content_type);
    res.headers.insert("Content-Length", file.file_size()?.to_string());
    res.body_stream = file.into_stream()?;
    Ok(res)
}

fn upload(filename: String, mut body: Stream) -> Result<()> {
    let mut file = File::open(Args { path: filename, mode: "w".to_string() })?;
    let mut failure = None;
    body.drain(|chunk| {
        if failure.is_none() {
            if let Err(e) = file.write(chunk) {
                failure = Some(e);
            }
        }
    });
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
