//! HTTP provisioning sink against a loopback test server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use presence_bridge::{EventSink, HttpSink, HttpSinkConfig};

#[derive(Debug)]
struct Recorded {
    method: String,
    path: String,
    content_type: Option<String>,
    body: String,
}

struct Reply {
    status: u16,
    location: Option<&'static str>,
}

fn read_request(stream: &mut TcpStream) -> Recorded {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf).expect("read request");
        assert!(n > 0, "connection closed before headers");
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().expect("request line").split_whitespace();
    let method = request_line.next().expect("method").to_string();
    let path = request_line.next().expect("path").to_string();
    let mut content_length = 0usize;
    let mut content_type = None;
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            match k.trim().to_lowercase().as_str() {
                "content-length" => content_length = v.trim().parse().expect("content-length"),
                "content-type" => content_type = Some(v.trim().to_string()),
                _ => {}
            }
        }
    }

    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).expect("read body");
        assert!(n > 0, "connection closed before body");
        body.extend_from_slice(&buf[..n]);
    }

    Recorded {
        method,
        path,
        content_type,
        body: String::from_utf8_lossy(&body).to_string(),
    }
}

fn write_reply(stream: &mut TcpStream, reply: &Reply) {
    let mut response = format!("HTTP/1.1 {} Status\r\n", reply.status);
    if let Some(location) = reply.location {
        response.push_str(&format!("Location: {}\r\n", location));
    }
    response.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    stream
        .write_all(response.as_bytes())
        .expect("write response");
}

/// Serve one connection per scripted reply, returning what was received.
fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let join = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for reply in replies {
            let (mut stream, _) = listener.accept().expect("accept");
            seen.push(read_request(&mut stream));
            write_reply(&mut stream, &reply);
        }
        seen
    });
    (base, join)
}

fn sink(endpoint: String, payload: Option<&str>) -> HttpSink {
    HttpSink::new(HttpSinkConfig {
        endpoint,
        payload: payload.map(str::to_string),
        timeout: Duration::from_secs(5),
    })
    .expect("sink")
}

#[test]
fn activation_posts_payload_and_deactivation_deletes_created_resource() {
    let (base, server) = serve(vec![
        Reply {
            status: 201,
            location: Some("/af/v1/subscriptions/42"),
        },
        Reply {
            status: 204,
            location: None,
        },
    ]);
    let payload = r#"{"ueIpv4Addr":"10.45.0.2","qosReference":"qos_video"}"#;
    let mut sink = sink(format!("{}/af/v1/subscriptions", base), Some(payload));

    sink.on_activated().expect("activation");
    assert_eq!(
        sink.resource(),
        Some(format!("{}/af/v1/subscriptions/42", base).as_str())
    );
    sink.on_deactivated(Duration::from_secs(10))
        .expect("deactivation");
    assert!(sink.resource().is_none());

    let seen = server.join().expect("server");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/af/v1/subscriptions");
    assert_eq!(seen[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(seen[0].body, payload);
    assert_eq!(seen[1].method, "DELETE");
    assert_eq!(seen[1].path, "/af/v1/subscriptions/42");
}

#[test]
fn without_location_deletes_endpoint_and_posts_empty_object() {
    let (base, server) = serve(vec![
        Reply {
            status: 200,
            location: None,
        },
        Reply {
            status: 200,
            location: None,
        },
    ]);
    let mut sink = sink(format!("{}/qos", base), None);

    sink.on_activated().expect("activation");
    sink.on_deactivated(Duration::from_secs(10))
        .expect("deactivation");

    let seen = server.join().expect("server");
    assert_eq!(seen[0].body, "{}");
    assert_eq!(seen[1].method, "DELETE");
    assert_eq!(seen[1].path, "/qos");
}

#[test]
fn error_status_is_reported() {
    let (base, server) = serve(vec![Reply {
        status: 503,
        location: None,
    }]);
    let mut sink = sink(format!("{}/qos", base), None);

    let err = sink.on_activated().unwrap_err();
    assert!(err.to_string().contains("503"), "{}", err);
    assert!(sink.resource().is_none());
    server.join().expect("server");
}

#[test]
fn unreachable_endpoint_is_reported() {
    // Bind then drop to get a port with nothing listening.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let mut sink = sink(format!("http://127.0.0.1:{}/qos", port), None);
    let err = sink.on_deactivated(Duration::from_secs(10)).unwrap_err();
    assert!(err.to_string().contains("DELETE"), "{}", err);
}

#[test]
fn relative_location_is_resolved_against_endpoint() {
    let (base, server) = serve(vec![
        Reply {
            status: 201,
            location: Some("sub-9"),
        },
        Reply {
            status: 204,
            location: None,
        },
    ]);
    let mut sink = sink(format!("{}/af/v1/subscriptions/", base), None);

    sink.on_activated().expect("activation");
    sink.on_deactivated(Duration::from_secs(10))
        .expect("deactivation");

    let seen = server.join().expect("server");
    assert_eq!(seen[0].path, "/af/v1/subscriptions/");
    assert_eq!(seen[1].method, "DELETE");
    assert_eq!(seen[1].path, "/af/v1/subscriptions/sub-9");
}
