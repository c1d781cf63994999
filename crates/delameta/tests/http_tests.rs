use std::sync::Arc;

use delameta::http::{arg, chunked, Http, Json, RequestReader, RequestWriter, ResponseReader};
use delameta::{endpoint, Stream};

fn dummy_descriptor() -> delameta::SharedDescriptor {
    endpoint::open("file:///dev/null").unwrap().into_shared()
}

#[test]
fn parse_request() {
    let desc = dummy_descriptor();
    let payload = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
    let mut req = RequestReader::parse(&desc, payload);

    assert_eq!(req.method, "POST");
    assert_eq!(req.url.path, "/submit");
    assert_eq!(req.url.host, "x");
    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.headers.get("Content-Length"), Some("5"));

    req.materialize_body();
    assert_eq!(req.body, "hello");
}

#[test]
fn parse_request_with_lf_only_terminators() {
    let desc = dummy_descriptor();
    let payload = b"GET /x HTTP/1.1\nHost: h\nContent-Length: 2\n\nok";
    let mut req = RequestReader::parse(&desc, payload);

    assert_eq!(req.method, "GET");
    assert_eq!(req.headers.get("Host"), Some("h"));
    req.materialize_body();
    assert_eq!(req.body, "ok");
}

#[test]
fn parse_response() {
    let desc = dummy_descriptor();
    let payload = b"HTTP/1.1 404 Not Found\r\nServer: test\r\nContent-Length: 9\r\n\r\nnot found";
    let mut res = ResponseReader::parse(&desc, payload);

    assert_eq!(res.version, "HTTP/1.1");
    assert_eq!(res.status, 404);
    assert_eq!(res.status_string, "Not Found");
    assert_eq!(res.headers.get("Server"), Some("test"));
    res.materialize_body();
    assert_eq!(res.body, "not found");
}

#[test]
fn request_serialization_round_trip() {
    let desc = dummy_descriptor();
    let mut req = RequestWriter {
        method: "POST".to_string(),
        url: delameta::URL::parse("/submit?x=1"),
        ..Default::default()
    };
    req.headers.insert("Host", "example");
    req.headers.insert("Content-Length", "5");
    req.body = "hello".to_string();

    let mut wire = Vec::new();
    req.dump().drain(|chunk| wire.extend_from_slice(chunk));

    let mut parsed = RequestReader::parse(&desc, &wire);
    assert_eq!(parsed.method, "POST");
    assert_eq!(parsed.url.path, "/submit");
    assert_eq!(parsed.url.queries.get("x").map(String::as_str), Some("1"));
    assert_eq!(parsed.headers.get("host"), Some("example"));
    parsed.materialize_body();
    assert_eq!(parsed.body, "hello");
}

fn routed_app() -> Http {
    let mut app = Http::new();
    app.get("/test", (arg::body(), arg::default_val("id", 0)), |body: String, id: i32| {
        format!("{body} id={id}")
    });
    app
}

#[test]
fn routing_dispatches_with_extractors() {
    let app = routed_app();
    let desc = dummy_descriptor();

    let payload = b"GET /test?id=7 HTTP/1.1\r\nContent-Length:4\r\n\r\nabcd";
    let (_, res) = app.execute(&desc, payload);
    assert_eq!(res.status, 200);
    assert_eq!(res.status_string, "OK");
    assert_eq!(res.body, "abcd id=7");
    assert_eq!(res.headers.get("Content-Type"), Some("text/plain"));
}

#[test]
fn routing_method_mismatch_is_405() {
    let app = routed_app();
    let desc = dummy_descriptor();

    let payload = b"POST /test HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd";
    let (_, res) = app.execute(&desc, payload);
    assert_eq!(res.status, 405);
    assert_eq!(res.status_string, "Method Not Allowed");
}

#[test]
fn routing_unknown_path_is_404() {
    let app = routed_app();
    let desc = dummy_descriptor();

    let payload = b"GET /nope HTTP/1.1\r\n\r\n";
    let (_, res) = app.execute(&desc, payload);
    assert_eq!(res.status, 404);
}

#[test]
fn missing_arg_is_400() {
    let mut app = Http::new();
    app.get("/need", (arg::arg::<String>("token"),), |token: String| token);
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /need HTTP/1.1\r\n\r\n");
    assert_eq!(res.status, 400);
    assert_eq!(res.body, "arg 'token' not found");
}

#[test]
fn arg_prefers_header_over_query() {
    let mut app = Http::new();
    app.get("/who", (arg::arg::<String>("name"),), |name: String| name);
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /who?name=query HTTP/1.1\r\nname: header\r\n\r\n");
    assert_eq!(res.body, "header");
}

#[test]
fn json_item_extraction() {
    let mut app = Http::new();
    app.post(
        "/sum",
        (arg::json_item::<i32>("a"), arg::json_item_default_val("b", 10)),
        |a: i32, b: i32| a + b,
    );
    let desc = dummy_descriptor();

    let body = br#"{"a": 5}"#;
    let payload = format!(
        "POST /sum HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        std::str::from_utf8(body).unwrap()
    );
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.status, 200);
    assert_eq!(res.body, "15");

    // wrong content type
    let payload = "POST /sum HTTP/1.1\r\nContent-Length: 8\r\n\r\n{\"a\": 5}";
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.status, 400);
    assert_eq!(res.body, "Content-Type is not json");
}

#[test]
fn form_extraction() {
    let mut app = Http::new();
    app.post("/login", (arg::form::<String>("user"),), |user: String| user);
    let desc = dummy_descriptor();

    let payload = "POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 19\r\n\r\nuser=alice&pass=123";
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.status, 200);
    assert_eq!(res.body, "alice");

    let payload = "POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 8\r\n\r\npass=123";
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.status, 400);
    assert_eq!(res.body, "key 'user' not found");
}

#[test]
fn json_response_serialization() {
    let mut app = Http::new();
    app.get("/items", (), || Json(vec!["a".to_string(), "b".to_string()]));
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /items HTTP/1.1\r\n\r\n");
    assert_eq!(res.status, 200);
    assert_eq!(res.headers.get("Content-Type"), Some("application/json"));
    assert_eq!(res.body, r#"["a","b"]"#);
}

#[test]
fn result_err_goes_through_error_handler() {
    let mut app = Http::new();
    app.get("/fail", (), || -> delameta::http::Result<String> {
        Err(delameta::http::Error::new(409, "already exists"))
    });
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /fail HTTP/1.1\r\n\r\n");
    assert_eq!(res.status, 409);
    assert_eq!(res.body, "already exists");
}

#[test]
fn custom_error_handler() {
    let mut app = Http::new();
    app.get("/fail", (), || -> delameta::http::Result<String> {
        Err(delameta::http::Error::new(400, "nope"))
    });
    app.error_handler = Arc::new(|err, _req, res| {
        res.status = err.status;
        res.body = format!("custom: {}", err.message);
    });
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /fail HTTP/1.1\r\n\r\n");
    assert_eq!(res.body, "custom: nope");
}

#[test]
fn precondition_short_circuits() {
    let mut app = Http::new();
    app.precondition(|req, _res| {
        if req.headers.get("Authorization").is_some() {
            Ok(())
        } else {
            Err(delameta::http::Error::new(401, "unauthorized"))
        }
    });
    app.get("/secure", (), || "secret");
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /secure HTTP/1.1\r\n\r\n");
    assert_eq!(res.status, 401);
    assert_eq!(res.body, "unauthorized");

    let (_, res) = app.execute(&desc, b"GET /secure HTTP/1.1\r\nAuthorization: yes\r\n\r\n");
    assert_eq!(res.status, 200);
    assert_eq!(res.body, "secret");
}

#[test]
fn global_headers_and_response_time() {
    let mut app = Http::new();
    app.show_response_time = true;
    app.global_header("X-Powered-By", |_req, _res| "delameta".to_string());
    app.global_header("X-Empty", |_req, _res| String::new());
    app.get("/", (), || "ok");
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(res.headers.get("X-Powered-By"), Some("delameta"));
    assert!(res.headers.get("X-Empty").is_none());
    assert!(res.headers.get("X-Response-Time").unwrap().ends_with("ms"));
    assert!(res.headers.get("Server").unwrap().starts_with("delameta/"));
}

#[test]
fn content_length_autofill() {
    let mut app = Http::new();
    app.get("/text", (), || "four");
    app.get("/empty", (), || ());
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /text HTTP/1.1\r\n\r\n");
    assert_eq!(res.headers.get("Content-Length"), Some("4"));

    let (_, res) = app.execute(&desc, b"GET /empty HTTP/1.1\r\n\r\n");
    assert_eq!(res.headers.get("Content-Length"), Some("0"));
}

#[test]
fn reroute_dispatches_other_path() {
    let mut app = Http::new();
    app.get("/real", (), || "the real one");
    let desc = dummy_descriptor();
    let (mut req, mut res) = app.execute(&desc, b"GET /real HTTP/1.1\r\n\r\n");
    assert_eq!(res.body, "the real one");

    res.body.clear();
    app.reroute("/real", &mut req, &mut res).unwrap();
    assert_eq!(res.body, "the real one");

    let err = app.reroute("/missing", &mut req, &mut res).unwrap_err();
    assert_eq!(err.status, 404);
}

#[test]
fn chunked_round_trip() {
    let mut input = Stream::new();
    input.push("hello ").push("chunked ").push("world");
    let mut encoded = Vec::new();
    chunked::encode(input).drain(|chunk| encoded.extend_from_slice(chunk));

    let text = String::from_utf8(encoded.clone()).unwrap();
    assert!(text.starts_with("6\r\nhello \r\n"));
    assert!(text.ends_with("0\r\n\r\n"));

    let desc = dummy_descriptor();
    let mut decoded = Vec::new();
    chunked::decode(desc, encoded.into()).drain(|chunk| decoded.extend_from_slice(chunk));
    assert_eq!(decoded, b"hello chunked world");
}

#[test]
fn chunked_request_body() {
    let desc = dummy_descriptor();
    let payload =
        b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let mut req = RequestReader::parse(&desc, payload);
    req.materialize_body();
    assert_eq!(req.body, "hello world");
}

#[test]
fn serve_static_routes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
    std::fs::create_dir(dir.path().join("js")).unwrap();
    std::fs::write(dir.path().join("js/app.js"), "console.log(1)").unwrap();

    let mut app = Http::new();
    app.serve_static("/static", dir.path().to_str().unwrap(), false);
    let desc = dummy_descriptor();

    let (_, res) = app.execute(&desc, b"GET /static/js/app.js HTTP/1.1\r\n\r\n");
    assert_eq!(res.status, 200);
    let mut res = res;
    let mut body = Vec::new();
    res.body_stream.drain(|chunk| body.extend_from_slice(chunk));
    assert_eq!(body, b"console.log(1)");

    // index.html aliases the prefix itself
    let (_, res) = app.execute(&desc, b"GET /static HTTP/1.1\r\n\r\n");
    assert_eq!(res.status, 200);
    assert_eq!(res.headers.get("Content-Type"), Some("text/html"));
}

#[test]
fn file_routes_upload_download() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let path_str = path.to_str().unwrap();

    let mut app = Http::new();
    delameta::http::register_file_routes(&mut app);
    let desc = dummy_descriptor();

    let payload = format!(
        "PUT /upload?filename={path_str} HTTP/1.1\r\nContent-Length: 8\r\n\r\npayload!"
    );
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.status, 200);
    assert_eq!(std::fs::read(&path).unwrap(), b"payload!");

    let payload = format!("GET /file_size?filename={path_str} HTTP/1.1\r\n\r\n");
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.body, "8");

    let payload = format!("GET /download?filename={path_str} HTTP/1.1\r\n\r\n");
    let (_, mut res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.status, 200);
    let mut body = Vec::new();
    res.body_stream.drain(|chunk| body.extend_from_slice(chunk));
    assert_eq!(body, b"payload!");

    let payload = format!("GET /ls?path={} HTTP/1.1\r\n\r\n", dir.path().to_str().unwrap());
    let (_, res) = app.execute(&desc, payload.as_bytes());
    assert_eq!(res.body, r#"["data.bin"]"#);
}
