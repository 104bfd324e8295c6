//! One-shot diagnostic exchange with a controller (`--diagnose`).
//!
//! Checks that the controller answers a plain GET, then sends the full-fleet read
//! request once and prints what came back at every stage: status and headers, the
//! error body of a rejected request, or the raw reply, parsed registers, detected
//! zones and the snapshot that would be published.

use chrono::{DateTime, Utc};

use crate::client::{Exchange, TouchlineClient};
use crate::codec;
use crate::models::touchline::{RawValueMap, ZoneSnapshot};
use crate::zones;

const TEMPERATURE_SUFFIXES: [&str; 2] = [".RaumTemp", ".SollTemp"];

/// Run the diagnostic exchange. `Ok(true)` when the controller answered the read request with HTTP 200.
pub fn run(client: &TouchlineClient) -> Result<bool, String> {
    println!("Testing basic connection to {}", client.base_url());
    let status = client
        .check_reachable()
        .map_err(|e| format!("basic connection to {} failed: {}", client.base_url(), e))?;
    println!("Basic connection successful (status: {})", status);
    println!();

    let items = zones::build_zone_request_items(client.max_zones());
    let request = codec::build_request(&items).map_err(|e| e.to_string())?;

    println!("Testing XML API at {}", client.endpoint());
    println!("Max zones: {}", client.max_zones());
    println!("Request: {}", request);
    println!();

    let exchange = client
        .read_values(&items)
        .map_err(|e| format!("request to {} failed: {}", client.endpoint(), e))?;
    println!("{}", render_reply(&exchange));
    match exchange {
        Exchange::Accepted(reply) => {
            println!("{}", render_analysis(&reply.body, client.max_zones(), Utc::now()));
            Ok(true)
        }
        Exchange::Rejected(_) => Ok(false),
    }
}

/// Status line and headers of a reply; rejected replies also show their body.
pub fn render_reply(exchange: &Exchange) -> String {
    let reply = exchange.reply();
    let mut lines = vec![format!("Response status: {}", reply.status), "Response headers:".to_string()];
    lines.extend(reply.headers.iter().map(|(name, value)| format!("  {}: {}", name, value)));
    match exchange {
        Exchange::Accepted(_) => lines.push(format!("Response received ({} characters)", reply.body.len())),
        Exchange::Rejected(_) => {
            lines.push(format!("HTTP error {}", reply.status.as_u16()));
            lines.push(format!("Error response: {}", reply.body));
        }
    }
    lines.join("\n")
}

/// Human-readable breakdown of one reply.
pub fn render_analysis(text: &str, max_zones: u32, now: DateTime<Utc>) -> String {
    let mut lines = vec!["RAW RESPONSE:".to_string(), text.to_string(), String::new()];

    let values = codec::parse_response(text);
    if values.is_empty() {
        lines.push("No values parsed - response format may differ from the expected schema".to_string());
    } else {
        lines.push(format!("Parsed {} value(s):", values.len()));
        lines.extend(values.iter().map(|(key, value)| format!("  {}", describe_value(key, value))));
    }
    lines.push(String::new());

    let snapshot = snapshot_from_values(&values, max_zones, now);
    if snapshot.is_empty() {
        lines.push("No zones detected".to_string());
    } else {
        lines.push(format!("Found {} zone(s):", snapshot.len()));
        for zone in snapshot.zones.values() {
            lines.push(format!("  Zone {} ({}):", zone.id, zone.name));
            lines.push(format!("    Current temp: {}", celsius(zone.current_temperature)));
            lines.push(format!("    Target temp:  {}", celsius(zone.target_temperature)));
        }
    }
    lines.push(String::new());

    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => lines.push(json),
        Err(e) => lines.push(format!("Snapshot could not be serialized: {}", e)),
    }
    lines.join("\n")
}

/// The snapshot a refresh would publish if every zone answered with `values`.
fn snapshot_from_values(values: &RawValueMap, max_zones: u32, now: DateTime<Utc>) -> ZoneSnapshot {
    let zones = zones::list_available_zones(values, max_zones)
        .into_iter()
        .map(|d| zones::extract_zone_data_at(values, d.id, now));
    ZoneSnapshot::new(now, zones)
}

fn describe_value(key: &str, value: &str) -> String {
    if TEMPERATURE_SUFFIXES.iter().any(|s| key.ends_with(*s))
        && let Ok(hundredths) = value.trim().parse::<i64>()
    {
        return format!("{}: {} (raw) -> {:.1}°C", key, value, hundredths as f64 / 100.0);
    }
    format!("{}: {}", key, value)
}

fn celsius(value: Option<f64>) -> String {
    value.map(|c| format!("{:.1}°C", c)).unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, attach_with};
    use crate::models::touchline::ZoneId;
    use chrono::TimeZone;
    use http::StatusCode;
    use mockito::Server;

    fn client_for(server: &mockito::ServerGuard) -> TouchlineClient {
        let addr = server.host_with_port();
        let (host, port) = addr.rsplit_once(':').expect("host:port");
        attach_with(host, port.parse().expect("numeric port"), 2)
    }

    #[test]
    fn rejected_reply_shows_headers_and_error_body() {
        let exchange = Exchange::Rejected(Reply {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: vec![("server".to_string(), "SpiderControl".to_string())],
            body: "ILR busy".to_string(),
        });
        let report = render_reply(&exchange);
        assert!(report.contains("Response status: 500 Internal Server Error"));
        assert!(report.contains("  server: SpiderControl"));
        assert!(report.contains("HTTP error 500"));
        assert!(report.contains("Error response: ILR busy"));
    }

    #[test]
    fn accepted_reply_shows_headers_and_size() {
        let exchange = Exchange::Accepted(Reply {
            status: StatusCode::OK,
            headers: vec![("content-type".to_string(), "text/xml".to_string())],
            body: "<body/>".to_string(),
        });
        let report = render_reply(&exchange);
        assert!(report.contains("  content-type: text/xml"));
        assert!(report.contains("Response received (7 characters)"));
        assert!(!report.contains("Error response"));
    }

    #[test]
    fn run_reports_rejected_read_request() {
        let mut server = Server::new();
        let root = server.mock("GET", "/").with_status(200).with_body("<html/>").create();
        let read = server
            .mock("POST", crate::client::READ_VALUES_PATH)
            .with_status(500)
            .with_body("ILR busy")
            .create();

        let client = client_for(&server);
        assert_eq!(run(&client), Ok(false));
        root.assert();
        read.assert();
    }

    #[test]
    fn run_succeeds_on_accepted_read_request() {
        let mut server = Server::new();
        let _root = server.mock("GET", "/").with_status(404).create();
        let _read = server
            .mock("POST", crate::client::READ_VALUES_PATH)
            .with_status(200)
            .with_body("<body><i><n>G1.RaumTemp</n><v>2000</v></i></body>")
            .create();

        let client = client_for(&server);
        assert_eq!(run(&client), Ok(true));
    }

    #[test]
    fn run_stops_when_controller_is_unreachable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let err = run(&attach_with("127.0.0.1", port, 2)).unwrap_err();
        assert!(err.contains("basic connection"));
    }

    #[test]
    fn analysis_lists_registers_and_zones() {
        let reply = "<body><i><n>G0.RaumTemp</n><v>2150</v></i><i><n>G0.name</n><v>Living</v></i>\
                     <i><n>R0.SystemStatus</n><v>1</v></i></body>";
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 6, 30, 0).unwrap();
        let report = render_analysis(reply, 7, now);

        assert!(report.contains("Parsed 3 value(s):"));
        assert!(report.contains("G0.RaumTemp: 2150 (raw) -> 21.5°C"));
        assert!(report.contains("R0.SystemStatus: 1"));
        assert!(report.contains("Found 1 zone(s):"));
        assert!(report.contains("Zone G0 (Living):"));
        assert!(report.contains("Target temp:  N/A"));
        assert!(report.contains("\"G0\""));
    }

    #[test]
    fn analysis_of_unparsable_reply() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 6, 30, 0).unwrap();
        let report = render_analysis("<html>", 7, now);
        assert!(report.contains("No values parsed"));
        assert!(report.contains("No zones detected"));
    }

    #[test]
    fn snapshot_from_values_uses_shared_timestamp() {
        let values: RawValueMap = [("G3.SollTemp", "1950"), ("G5.name", "Attic")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 6, 30, 0).unwrap();
        let snapshot = snapshot_from_values(&values, 7, now);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.refreshed_at, Some(now));
        assert_eq!(snapshot.get(ZoneId(3)).unwrap().target_temperature, Some(19.5));
        assert_eq!(snapshot.get(ZoneId(5)).unwrap().name, "Attic");
        assert!(snapshot.zones.values().all(|z| z.last_updated == now));
    }

    #[test]
    fn non_numeric_temperature_is_shown_verbatim() {
        assert_eq!(describe_value("G1.RaumTemp", "n/a"), "G1.RaumTemp: n/a");
        assert_eq!(describe_value("G1.name", "2000"), "G1.name: 2000");
    }
}
