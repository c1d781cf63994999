//! Declarative argument extractors.
//!
//! A route declares a tuple of extractor values; the handler's parameters
//! line up positionally. Extractors run in order and the first error goes to
//! the engine's error handler.
//!
//! ```no_run
//! use delameta::http::{arg, Http};
//!
//! let mut app = Http::new();
//! app.get("/test", (arg::body(), arg::default_val("id", 0)), |body: String, id: i32| {
//!     if id > 0 { format!("{body} with id = {id}") } else { body }
//! });
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::http::request::{RequestReader, RequestWriter};
use crate::http::response::ResponseWriter;
use crate::http::Error;
use crate::stream::Stream;
use crate::url::URL;

/// Per-request classification of the body, built once before extraction.
pub struct Context {
    pub content_type: String,
    kind: BodyKind,
}

enum BodyKind {
    Any,
    Json(serde_json::Value),
    JsonError(String),
    Form(HashMap<String, String>),
}

impl Context {
    pub fn new(req: &mut RequestReader) -> Context {
        let content_type = req.headers.get("Content-Type").unwrap_or("").to_string();

        let kind = if content_type.starts_with("application/json") {
            req.materialize_body();
            match serde_json::from_str(&req.body) {
                Ok(value) => BodyKind::Json(value),
                Err(e) => BodyKind::JsonError(e.to_string()),
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            req.materialize_body();
            match serde_urlencoded::from_str(&req.body) {
                Ok(map) => BodyKind::Form(map),
                Err(_) => BodyKind::Form(HashMap::new()),
            }
        } else {
            BodyKind::Any
        };

        Context { content_type, kind }
    }

    fn json_object(&self) -> Result<&serde_json::Map<String, serde_json::Value>, Error> {
        match &self.kind {
            BodyKind::Json(serde_json::Value::Object(map)) => Ok(map),
            BodyKind::Json(_) => Err(Error::new(400, "JSON is not a map")),
            BodyKind::JsonError(msg) => Err(Error::new(400, msg.clone())),
            _ => Err(Error::new(400, "Content-Type is not json")),
        }
    }

    fn form_at(&self, key: &str) -> Result<&str, Error> {
        match &self.kind {
            BodyKind::Form(map) => map
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| Error::new(400, format!("key '{key}' not found"))),
            _ => Err(Error::new(400, "Content-Type is not url-encoded")),
        }
    }
}

/// One declared argument source.
pub trait Extractor {
    type Output;

    fn extract(
        &self,
        req: &mut RequestReader,
        res: &mut ResponseWriter,
        ctx: &mut Context,
    ) -> Result<Self::Output, Error>;
}

/// Conversion from a header/query/form string into a handler argument.
pub trait FromArgValue: Sized {
    fn from_arg_value(value: &str) -> Result<Self, Error>;
}

impl FromArgValue for String {
    fn from_arg_value(value: &str) -> Result<Self, Error> {
        Ok(value.to_string())
    }
}

impl FromArgValue for bool {
    fn from_arg_value(value: &str) -> Result<Self, Error> {
        match value {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(Error::new(400, format!("cannot parse '{other}' as bool"))),
        }
    }
}

macro_rules! impl_from_arg_value_numeric {
    ($($t:ty),*) => {$(
        impl FromArgValue for $t {
            fn from_arg_value(value: &str) -> Result<Self, Error> {
                value.parse().map_err(|_| {
                    Error::new(400, format!("cannot parse '{}' as {}", value, stringify!($t)))
                })
            }
        }
    )*};
}

impl_from_arg_value_numeric!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

fn lookup<'a>(req: &'a RequestReader, name: &str) -> Option<&'a str> {
    req.headers
        .get(name)
        .or_else(|| req.url.queries.get(name).map(String::as_str))
}

/// Header-or-query argument; `400` when absent.
pub struct Arg<T> {
    name: &'static str,
    _marker: PhantomData<T>,
}

impl<T: FromArgValue> Extractor for Arg<T> {
    type Output = T;

    fn extract(&self, req: &mut RequestReader, _: &mut ResponseWriter, _: &mut Context) -> Result<T, Error> {
        match lookup(req, self.name) {
            Some(value) => T::from_arg_value(value),
            None => Err(Error::new(400, format!("arg '{}' not found", self.name))),
        }
    }
}

/// Header-or-query argument with a fallback value; never fails on absence.
pub struct DefaultVal<T> {
    name: &'static str,
    default: T,
}

impl<T: FromArgValue + Clone> Extractor for DefaultVal<T> {
    type Output = T;

    fn extract(&self, req: &mut RequestReader, _: &mut ResponseWriter, _: &mut Context) -> Result<T, Error> {
        match lookup(req, self.name) {
            Some(value) => T::from_arg_value(value),
            None => Ok(self.default.clone()),
        }
    }
}

/// Header-or-query argument with a fallback function; the function's error
/// propagates.
pub struct DefaultFn<T, F> {
    name: &'static str,
    fallback: F,
    _marker: PhantomData<T>,
}

impl<T, F> Extractor for DefaultFn<T, F>
where
    T: FromArgValue,
    F: Fn(&mut RequestReader, &mut ResponseWriter) -> Result<T, Error>,
{
    type Output = T;

    fn extract(&self, req: &mut RequestReader, res: &mut ResponseWriter, _: &mut Context) -> Result<T, Error> {
        match lookup(req, self.name) {
            Some(value) => T::from_arg_value(value),
            None => (self.fallback)(req, res),
        }
    }
}

fn json_item_value<T: DeserializeOwned>(ctx: &Context, key: &str) -> Result<Option<T>, Error> {
    let map = ctx.json_object()?;
    match map.get(key) {
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::new(400, e.to_string())),
        None => Ok(None),
    }
}

/// One key of a JSON body; `400` when the content type is not JSON or the
/// key is absent (unless `T` accepts null, e.g. `Option<_>`).
pub struct JsonItem<T> {
    key: &'static str,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Extractor for JsonItem<T> {
    type Output = T;

    fn extract(&self, _: &mut RequestReader, _: &mut ResponseWriter, ctx: &mut Context) -> Result<T, Error> {
        match json_item_value(ctx, self.key)? {
            Some(value) => Ok(value),
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| Error::new(400, format!("key '{}' not found", self.key))),
        }
    }
}

pub struct JsonItemDefaultVal<T> {
    key: &'static str,
    default: T,
}

impl<T: DeserializeOwned + Clone> Extractor for JsonItemDefaultVal<T> {
    type Output = T;

    fn extract(&self, _: &mut RequestReader, _: &mut ResponseWriter, ctx: &mut Context) -> Result<T, Error> {
        Ok(json_item_value(ctx, self.key)?.unwrap_or_else(|| self.default.clone()))
    }
}

pub struct JsonItemDefaultFn<T, F> {
    key: &'static str,
    fallback: F,
    _marker: PhantomData<T>,
}

impl<T, F> Extractor for JsonItemDefaultFn<T, F>
where
    T: DeserializeOwned,
    F: Fn(&mut RequestReader, &mut ResponseWriter) -> Result<T, Error>,
{
    type Output = T;

    fn extract(&self, req: &mut RequestReader, res: &mut ResponseWriter, ctx: &mut Context) -> Result<T, Error> {
        match json_item_value(ctx, self.key)? {
            Some(value) => Ok(value),
            None => (self.fallback)(req, res),
        }
    }
}

/// One key of an `application/x-www-form-urlencoded` body.
pub struct FormItem<T> {
    key: &'static str,
    _marker: PhantomData<T>,
}

impl<T: FromArgValue> Extractor for FormItem<T> {
    type Output = T;

    fn extract(&self, _: &mut RequestReader, _: &mut ResponseWriter, ctx: &mut Context) -> Result<T, Error> {
        ctx.form_at(self.key).and_then(T::from_arg_value)
    }
}

/// Arbitrary user function; its error propagates.
pub struct Depends<T, F> {
    depends: F,
    _marker: PhantomData<T>,
}

impl<T, F> Extractor for Depends<T, F>
where
    F: Fn(&mut RequestReader, &mut ResponseWriter) -> Result<T, Error>,
{
    type Output = T;

    fn extract(&self, req: &mut RequestReader, res: &mut ResponseWriter, _: &mut Context) -> Result<T, Error> {
        (self.depends)(req, res)
    }
}

macro_rules! field_extractor {
    ($(#[$doc:meta])* $name:ident, $out:ty, |$req:ident, $res:ident, $ctx:ident| $body:expr) => {
        $(#[$doc])*
        pub struct $name;

        impl Extractor for $name {
            type Output = $out;

            #[allow(unused_variables)]
            fn extract(
                &self,
                $req: &mut RequestReader,
                $res: &mut ResponseWriter,
                $ctx: &mut Context,
            ) -> Result<$out, Error> {
                $body
            }
        }
    };
}

field_extractor!(
    /// The owned, writable snapshot of the request (its single-consumer body
    /// stream stays with the engine).
    Request, RequestWriter, |req, res, ctx| Ok(req.to_writer())
);
field_extractor!(
    /// Takes the in-flight response. A handler asking for it must return it
    /// (a returned `ResponseWriter` replaces the current response).
    Response, ResponseWriter, |req, res, ctx| Ok(std::mem::take(res))
);
field_extractor!(Url, URL, |req, res, ctx| Ok(req.url.clone()));
field_extractor!(HeadersArg, crate::http::Headers, |req, res, ctx| Ok(req.headers.clone()));
field_extractor!(Queries, HashMap<String, String>, |req, res, ctx| Ok(req.url.queries.clone()));
field_extractor!(Path, String, |req, res, ctx| Ok(req.url.path.clone()));
field_extractor!(FullPath, String, |req, res, ctx| Ok(req.url.full_path.clone()));
field_extractor!(Fragment, String, |req, res, ctx| Ok(req.url.fragment.clone()));
field_extractor!(Version, String, |req, res, ctx| Ok(req.version.clone()));
field_extractor!(Method, String, |req, res, ctx| Ok(req.method.clone()));
field_extractor!(
    /// The materialized body.
    Body, String, |req, res, ctx| {
        req.materialize_body();
        Ok(req.body.clone())
    }
);
field_extractor!(
    /// The unread body stream, moved out of the request.
    BodyStream, Stream, |req, res, ctx| Ok(std::mem::take(&mut req.body_stream))
);
field_extractor!(
    /// The materialized body, `400` unless the content type is `text/plain`.
    Text, String, |req, res, ctx| {
        if !ctx.content_type.starts_with("text/plain") {
            return Err(Error::new(400, "Content-Type is not text/plain"));
        }
        req.materialize_body();
        Ok(req.body.clone())
    }
);

/// The whole JSON body deserialized into `T`.
pub struct JsonBody<T> {
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Extractor for JsonBody<T> {
    type Output = T;

    fn extract(&self, _: &mut RequestReader, _: &mut ResponseWriter, ctx: &mut Context) -> Result<T, Error> {
        match &ctx.kind {
            BodyKind::Json(value) => {
                serde_json::from_value(value.clone()).map_err(|e| Error::new(400, e.to_string()))
            }
            BodyKind::JsonError(msg) => Err(Error::new(400, msg.clone())),
            _ => Err(Error::new(400, "Content-Type is not json")),
        }
    }
}

pub fn arg<T: FromArgValue>(name: &'static str) -> Arg<T> {
    Arg { name, _marker: PhantomData }
}

pub fn default_val<T: FromArgValue + Clone>(name: &'static str, default: T) -> DefaultVal<T> {
    DefaultVal { name, default }
}

pub fn default_fn<T, F>(name: &'static str, fallback: F) -> DefaultFn<T, F>
where
    T: FromArgValue,
    F: Fn(&mut RequestReader, &mut ResponseWriter) -> Result<T, Error>,
{
    DefaultFn { name, fallback, _marker: PhantomData }
}

pub fn json_item<T: DeserializeOwned>(key: &'static str) -> JsonItem<T> {
    JsonItem { key, _marker: PhantomData }
}

pub fn json_item_default_val<T: DeserializeOwned + Clone>(
    key: &'static str,
    default: T,
) -> JsonItemDefaultVal<T> {
    JsonItemDefaultVal { key, default }
}

pub fn json_item_default_fn<T, F>(key: &'static str, fallback: F) -> JsonItemDefaultFn<T, F>
where
    T: DeserializeOwned,
    F: Fn(&mut RequestReader, &mut ResponseWriter) -> Result<T, Error>,
{
    JsonItemDefaultFn { key, fallback, _marker: PhantomData }
}

pub fn form<T: FromArgValue>(key: &'static str) -> FormItem<T> {
    FormItem { key, _marker: PhantomData }
}

pub fn depends<T, F>(depends: F) -> Depends<T, F>
where
    F: Fn(&mut RequestReader, &mut ResponseWriter) -> Result<T, Error>,
{
    Depends { depends, _marker: PhantomData }
}

pub fn request() -> Request {
    Request
}

pub fn response() -> Response {
    Response
}

pub fn url() -> Url {
    Url
}

pub fn headers() -> HeadersArg {
    HeadersArg
}

pub fn queries() -> Queries {
    Queries
}

pub fn path() -> Path {
    Path
}

pub fn full_path() -> FullPath {
    FullPath
}

pub fn fragment() -> Fragment {
    Fragment
}

pub fn version() -> Version {
    Version
}

pub fn method() -> Method {
    Method
}

pub fn body() -> Body {
    Body
}

pub fn body_stream() -> BodyStream {
    BodyStream
}

pub fn text() -> Text {
    Text
}

pub fn json<T: DeserializeOwned>() -> JsonBody<T> {
    JsonBody { _marker: PhantomData }
}
