use std::sync::Arc;
use std::thread;
use std::time::Duration;

use delameta::http::{self, arg, Http, RequestWriter};
use delameta::{modbus, tcp, udp, SessionClient, Stream};

fn start_echo_server() -> (Arc<tcp::Server>, u16, thread::JoinHandle<delameta::Result<()>>) {
    let mut server = tcp::Server::new(tcp::ServerArgs {
        host: "127.0.0.1:0".to_string(),
        max_socket: 2,
    })
    .unwrap();
    server.handler = Some(Arc::new(|_desc, _peer, frame| Stream::from(frame.to_vec())));

    let port = server.local_port().unwrap();
    let server = Arc::new(server);
    let handle = {
        let server = server.clone();
        thread::spawn(move || server.start())
    };
    // give the workers a moment to reach accept
    thread::sleep(Duration::from_millis(50));
    (server, port, handle)
}

#[test]
fn tcp_echo_and_idempotent_stop() {
    let (server, port, handle) = start_echo_server();

    let client = tcp::Client::new(tcp::ClientArgs {
        host: format!("127.0.0.1:{port}"),
        timeout: 5,
        connection_timeout: 5,
    })
    .unwrap();

    let reply = client.request(Stream::from("ping")).unwrap();
    assert_eq!(reply, b"ping");

    let reply = client.request(Stream::from("pong")).unwrap();
    assert_eq!(reply, b"pong");

    server.stop();
    handle.join().unwrap().unwrap();
    // a second stop is a no-op
    server.stop();
}

#[test]
fn stop_before_start_is_noop() {
    let server = tcp::Server::new(tcp::ServerArgs {
        host: "127.0.0.1:0".to_string(),
        max_socket: 1,
    })
    .unwrap();
    server.stop();
    server.stop();
}

#[test]
fn invalid_max_socket_is_fatal() {
    let err = tcp::Server::new(tcp::ServerArgs {
        host: "127.0.0.1:0".to_string(),
        max_socket: 0,
    })
    .unwrap_err();
    assert_eq!(err.code, -1);

    let err = tcp::Server::new(tcp::ServerArgs {
        host: "127.0.0.1:0".to_string(),
        max_socket: tcp::MAX_SOCKET_CEILING + 1,
    })
    .unwrap_err();
    assert_eq!(err.code, -1);
}

fn start_http_server(app: Http) -> (Arc<tcp::Server>, u16, thread::JoinHandle<delameta::Result<()>>) {
    let mut server = tcp::Server::new(tcp::ServerArgs {
        host: "127.0.0.1:0".to_string(),
        max_socket: 2,
    })
    .unwrap();
    let app = Arc::new(app);
    app.bind(&mut server);

    let port = server.local_port().unwrap();
    let server = Arc::new(server);
    let handle = {
        let server = server.clone();
        thread::spawn(move || server.start())
    };
    thread::sleep(Duration::from_millis(50));
    (server, port, handle)
}

fn connect(port: u16) -> SessionClient {
    tcp::Client::new(tcp::ClientArgs {
        host: format!("127.0.0.1:{port}"),
        timeout: 5,
        connection_timeout: 5,
    })
    .unwrap()
}

#[test]
fn http_request_over_tcp() {
    let mut app = Http::new();
    app.get("/hello", (arg::default_val("name", "world".to_string()),), |name: String| {
        format!("hello {name}")
    });
    let (server, port, handle) = start_http_server(app);

    let session = connect(port);
    let req = RequestWriter {
        url: delameta::URL::parse("/hello?name=delameta"),
        ..Default::default()
    };
    let mut res = http::request(&session, req).unwrap();
    assert_eq!(res.status, 200);
    assert!(res.headers.get("Server").unwrap().starts_with("delameta/"));
    res.materialize_body();
    assert_eq!(res.body, "hello delameta");

    // keep-alive: a second exchange on the same connection
    let req = RequestWriter { url: delameta::URL::parse("/hello"), ..Default::default() };
    let mut res = http::request(&session, req).unwrap();
    res.materialize_body();
    assert_eq!(res.body, "hello world");

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn http_connection_close_ends_session() {
    let mut app = Http::new();
    app.get("/bye", (), || "bye");
    let (server, port, handle) = start_http_server(app);

    let session = connect(port);
    let mut req = RequestWriter { url: delameta::URL::parse("/bye"), ..Default::default() };
    req.headers.insert("Connection", "close");
    let mut res = http::request(&session, req).unwrap();
    res.materialize_body();
    assert_eq!(res.body, "bye");

    // the server closed its side; the next read reports it
    let err = session.desc.read().unwrap_err();
    assert!(err.is_connection_closed() || err.is_transfer_timeout());

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn http_streamed_body_spans_reads() {
    let mut app = Http::new();
    app.post("/sink", (arg::body(),), |body: String| body.len().to_string());
    let (server, port, handle) = start_http_server(app);

    // body large enough to span multiple kernel reads
    let body = "x".repeat(10_000);
    let session = connect(port);
    let mut req = RequestWriter {
        method: "POST".to_string(),
        url: delameta::URL::parse("/sink"),
        ..Default::default()
    };
    req.body = body;
    let mut res = http::request(&session, req).unwrap();
    res.materialize_body();
    assert_eq!(res.body, "10000");

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn modbus_over_tcp_loopback() {
    let mut registers = modbus::Server::new(0x0F);
    let values = [0x1111u16, 0x2222, 0x3333];
    for (i, value) in values.into_iter().enumerate() {
        registers.holding_register_getter(0x2001 + i as u16, move || value);
    }
    registers.holding_register_setter(0x2001, |_| {});

    let server = modbus::tcp::Server::new(
        tcp::ServerArgs { host: "127.0.0.1:0".to_string(), max_socket: 2 },
        registers,
    )
    .unwrap();
    let port = server.local_port().unwrap();
    let server = Arc::new(server);
    let handle = {
        let server = server.clone();
        thread::spawn(move || server.start())
    };
    thread::sleep(Duration::from_millis(50));

    let client = modbus::tcp::client(tcp::ClientArgs {
        host: format!("127.0.0.1:{port}"),
        timeout: 5,
        connection_timeout: 5,
    })
    .unwrap();

    let read = client.read_holding_registers(0x2001, 3).unwrap();
    assert_eq!(read, values);

    client.write_single_register(0x2001, 0x4444).unwrap();

    server.stop();
    handle.join().unwrap().unwrap();
}

#[test]
fn udp_echo() {
    let server = Arc::new({
        let mut server = udp::Server::new(udp::Args {
            host: "127.0.0.1:18752".to_string(),
            timeout: 5,
        });
        server.handler = Some(Arc::new(|_desc, _peer, frame| Stream::from(frame.to_vec())));
        server
    });
    let handle = {
        let server = server.clone();
        thread::spawn(move || server.start())
    };
    thread::sleep(Duration::from_millis(50));

    let client = udp::Client::new(udp::Args {
        host: "127.0.0.1:18752".to_string(),
        timeout: 5,
    })
    .unwrap();
    let reply = client.request(Stream::from("datagram")).unwrap();
    assert_eq!(reply, b"datagram");

    server.stop();
    handle.join().unwrap().unwrap();
}
