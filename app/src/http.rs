use std::error::Error;
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use json::object;
use tiny_http::{Method, Response};

use crate::daemon::{Command, Request};
use crate::error::{CommandError, Rejected};
use crate::roof::RoofState;
use crate::Status;

const HTML: &str = include_str!("home.html");

/// Bus calls may block, so allow the control thread a few I/O timeouts.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

type Body = Response<Cursor<Vec<u8>>>;

pub struct Server(tiny_http::Server);

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        tiny_http::Server::http(addr).map(Server)
    }

    pub fn handle_requests(&self, status: Arc<RwLock<Status>>, commands: Sender<Request>) {
        let json = "Content-type: application/json; charset=utf-8"
            .parse::<tiny_http::Header>()
            .unwrap();
        let html_content = "Content-type: text/html; charset=utf-8"
            .parse::<tiny_http::Header>()
            .unwrap();
        for request in self.0.incoming_requests() {
            let (path, query) = split_url(request.url());
            let response = match (request.method(), path) {
                (Method::Get, "/") => match status.read() {
                    Ok(current) => {
                        Response::from_string(render_home(&current)).with_header(html_content.clone())
                    }
                    Err(_) => unavailable(),
                },
                (Method::Get, "/roof.json") => match status.read() {
                    Ok(current) => Response::from_string(render_json(&current)).with_header(json.clone()),
                    Err(_) => unavailable(),
                },
                (Method::Post, "/timeout") => match parse_secs(query) {
                    Some(secs) => send(&commands, Command::SetTimeout(secs)),
                    None => Response::from_string("expected ?secs=N").with_status_code(400),
                },
                (Method::Post, path) => match command_for(path) {
                    Some(command) => send(&commands, command),
                    None => not_found(),
                },
                (_, "/") | (_, "/roof.json") => {
                    Response::from_string("Method not allowed").with_status_code(405)
                }
                _ => not_found(),
            };

            // Ignoring I/O errors that occur here so that we don't take down the process if there
            // is an issue sending the response.
            let _ = request.respond(response);
        }
    }

    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

fn not_found() -> Body {
    Response::from_string("Not found").with_status_code(404)
}

fn unavailable() -> Body {
    Response::from_string("Status unavailable").with_status_code(503)
}

fn split_url(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn parse_secs(query: &str) -> Option<u32> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "secs")
        .and_then(|(_, value)| value.parse().ok())
}

fn command_for(path: &str) -> Option<Command> {
    match path {
        "/open" => Some(Command::Open),
        "/close" => Some(Command::Close),
        "/abort" => Some(Command::Abort),
        "/stop" => Some(Command::Stop),
        "/lock" => Some(Command::Lock),
        "/unlock" => Some(Command::Unlock),
        _ => None,
    }
}

/// Forwards a command to the control thread and waits for its answer.
fn send(commands: &Sender<Request>, command: Command) -> Body {
    let (reply, answer) = mpsc::channel();
    if commands.send(Request { command, reply }).is_err() {
        return Response::from_string("Controller not running").with_status_code(503);
    }
    match answer.recv_timeout(REPLY_TIMEOUT) {
        Ok(Ok(outcome)) => Response::from_string(outcome.to_string()),
        Ok(Err(err)) => Response::from_string(err.to_string()).with_status_code(status_code(&err)),
        Err(_) => Response::from_string("Controller did not respond").with_status_code(504),
    }
}

fn status_code(err: &CommandError) -> u16 {
    match err {
        CommandError::Rejected(Rejected::Bus(_)) | CommandError::Bus(_) => 502,
        CommandError::Rejected(_) => 409,
        CommandError::Config(_) => 500,
    }
}

fn roof_summary(status: &Status) -> String {
    let roof = &status.roof;
    if !roof.connected {
        return String::from("⚪ Disconnected");
    }
    match roof.state {
        RoofState::Opening | RoofState::Closing => {
            format!("🟡 {} ({}s left)", roof.state, roof.time_left)
        }
        RoofState::Alert => String::from("🟠 Alert"),
        RoofState::Idle if roof.position.is_fault() => String::from("🔵 Unknown"),
        RoofState::Idle if roof.position.is_closed() => String::from("🟢 Closed"),
        RoofState::Idle if roof.position.is_open() => String::from("🔴 Open"),
        RoofState::Idle => String::from("🟠 Partially open"),
    }
}

fn render_home(status: &Status) -> String {
    let since = status
        .changed_at
        .map(|changed| {
            let formatter = timeago::Formatter::new();
            formatter.convert(Instant::now().duration_since(changed))
        })
        .unwrap_or_else(|| String::from("since start-up"));
    let events = status
        .recent
        .iter()
        .rev()
        .map(|event| format!("<li>{}</li>", escape_html(event)))
        .collect::<String>();
    HTML.replace("$roofstate$", &roof_summary(status))
        .replace("$since$", &since)
        .replace("$north$", &status.roof.position.north.to_string())
        .replace("$south$", &status.roof.position.south.to_string())
        .replace("$park$", &status.roof.park.to_string())
        .replace("$timeout$", &status.roof.motion_timeout.to_string())
        .replace("$locked$", if status.roof.locked { "engaged" } else { "released" })
        .replace("$events$", &events)
}

/// Event text can carry Modbus error details.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn render_json(status: &Status) -> String {
    let now = Instant::now();
    let roof = &status.roof;
    let obj = object! {
        connected: roof.connected,
        state: roof.state.to_string(),
        device: roof.device.to_string(),
        park: roof.park.to_string(),
        north: roof.position.north.to_string(),
        south: roof.position.south.to_string(),
        time_left: roof.time_left,
        motion_timeout: roof.motion_timeout,
        locked: roof.locked,
        open_coil: roof.coils.open.to_string(),
        close_coil: roof.coils.close.to_string(),
        secs_since_change: status.changed_at.map(|changed| now.duration_since(changed).as_secs()),
        events: status.recent.iter().cloned().collect::<Vec<String>>()
    };
    json::stringify_pretty(obj, 2)
}
