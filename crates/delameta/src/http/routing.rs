//! Handler plumbing: how extractor tuples call user closures and how return
//! values land in the response.

use std::sync::Arc;

use bytes::Bytes;

use crate::http::arg::{Context, Extractor};
use crate::http::request::RequestReader;
use crate::http::response::{ResponseReader, ResponseWriter};
use crate::http::Error;
use crate::stream::Stream;

/// A fully-wired route function; extraction failures and handler errors
/// surface as `Err` for the engine's error handler.
pub type RouteFn =
    Arc<dyn Fn(&mut RequestReader, &mut ResponseWriter) -> Result<(), Error> + Send + Sync>;

/// Maps a handler return value into the response.
pub trait IntoResponse {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error>;
}

impl IntoResponse for () {
    fn into_response(self, _: &mut ResponseWriter) -> Result<(), Error> {
        Ok(())
    }
}

fn set_content_type_if_unset(res: &mut ResponseWriter, value: &str) {
    if res.headers.get("Content-Type").is_none() {
        res.headers.insert("Content-Type", value);
    }
}

impl IntoResponse for String {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        res.body = self;
        set_content_type_if_unset(res, "text/plain");
        Ok(())
    }
}

impl IntoResponse for &'static str {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        self.to_string().into_response(res)
    }
}

macro_rules! impl_into_response_arithmetic {
    ($($t:ty),*) => {$(
        impl IntoResponse for $t {
            fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
                self.to_string().into_response(res)
            }
        }
    )*};
}

impl_into_response_arithmetic!(bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl IntoResponse for Vec<u8> {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        if res.headers.get("Content-Length").is_none() {
            res.headers.insert("Content-Length", self.len().to_string());
        }
        res.body_stream = Stream::from(self);
        set_content_type_if_unset(res, "application/octet-stream");
        Ok(())
    }
}

impl IntoResponse for Bytes {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        self.to_vec().into_response(res)
    }
}

impl IntoResponse for ResponseWriter {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        *res = self;
        Ok(())
    }
}

impl IntoResponse for ResponseReader {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        *res = self.to_writer();
        Ok(())
    }
}

impl IntoResponse for Stream {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        res.body_stream = self;
        Ok(())
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        res.body = self.to_string();
        set_content_type_if_unset(res, "application/json");
        Ok(())
    }
}

/// Serialize any `serde::Serialize` payload as an `application/json` body.
pub struct Json<T>(pub T);

impl<T: serde::Serialize> IntoResponse for Json<T> {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        res.body = serde_json::to_string(&self.0).map_err(|e| Error::new(500, e.to_string()))?;
        set_content_type_if_unset(res, "application/json");
        Ok(())
    }
}

impl<T: IntoResponse, E: Into<Error>> IntoResponse for Result<T, E> {
    fn into_response(self, res: &mut ResponseWriter) -> Result<(), Error> {
        match self {
            Ok(value) => value.into_response(res),
            Err(e) => Err(e.into()),
        }
    }
}

/// Wires a handler closure to its extractor tuple.
pub trait RouteHandler<X> {
    fn into_route_fn(self, extractors: X) -> RouteFn;
}

macro_rules! impl_route_handler {
    ($(($E:ident, $e:ident)),*) => {
        impl<F, R, $($E),*> RouteHandler<($($E,)*)> for F
        where
            F: Fn($($E::Output),*) -> R + Send + Sync + 'static,
            R: IntoResponse,
            $($E: Extractor + Send + Sync + 'static,)*
        {
            #[allow(unused_variables, unused_mut, non_snake_case)]
            fn into_route_fn(self, extractors: ($($E,)*)) -> RouteFn {
                Arc::new(move |req, res| {
                    let mut ctx = Context::new(req);
                    let ($($E,)*) = &extractors;
                    $(let $e = $E.extract(req, res, &mut ctx)?;)*
                    self($($e),*).into_response(res)
                })
            }
        }
    };
}

impl_route_handler!();
impl_route_handler!((E1, e1));
impl_route_handler!((E1, e1), (E2, e2));
impl_route_handler!((E1, e1), (E2, e2), (E3, e3));
impl_route_handler!((E1, e1), (E2, e2), (E3, e3), (E4, e4));
impl_route_handler!((E1, e1), (E2, e2), (E3, e3), (E4, e4), (E5, e5));
impl_route_handler!((E1, e1), (E2, e2), (E3, e3), (E4, e4), (E5, e5), (E6, e6));
impl_route_handler!((E1, e1), (E2, e2), (E3, e3), (E4, e4), (E5, e5), (E6, e6), (E7, e7));
impl_route_handler!(
    (E1, e1),
    (E2, e2),
    (E3, e3),
    (E4, e4),
    (E5, e5),
    (E6, e6),
    (E7, e7),
    (E8, e8)
);
