#![allow(clippy::unwrap_used)]
// Integration tests for descriptor resolution using wiremock.

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use viera_api::{Discovery, SsdpResponse};

const DESCRIPTION: &str = include_str!("fixtures/discovery_specs.xml");
const SPECS: &str = include_str!("fixtures/discovery_crypto_check.xml");
const SERIAL: &str = "4D454930-0200-1000-8001-A81374B30314";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Discovery) {
    let server = MockServer::start().await;
    (server, Discovery::with_client(reqwest::Client::new()))
}

fn response(server: &MockServer, usn: &str) -> SsdpResponse {
    let datagram = format!(
        "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\nLOCATION: {}/nrc/ddd.xml\r\n\
         ST: urn:panasonic-com:service:p00NetworkControl:1\r\nUSN: {usn}\r\n\r\n",
        server.uri()
    );
    SsdpResponse::parse(&datagram).unwrap()
}

async fn mount_descriptors(server: &MockServer, specs: Option<&str>) {
    Mock::given(method("GET"))
        .and(path("/nrc/ddd.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DESCRIPTION))
        .mount(server)
        .await;

    let specs = match specs {
        Some(body) => ResponseTemplate::new(200).set_body_string(body),
        None => ResponseTemplate::new(404),
    };
    Mock::given(method("GET"))
        .and(path("/nrc/sdd_0.xml"))
        .respond_with(specs)
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_responses_yield_one_device() {
    let (server, discovery) = setup().await;
    mount_descriptors(&server, Some(SPECS)).await;

    let usn = format!("uuid:{SERIAL}::urn:panasonic-com:service:p00NetworkControl:1");
    let responses = vec![
        response(&server, &usn),
        response(&server, &usn),
        response(&server, &format!("uuid:{SERIAL}")),
    ];

    let devices = discovery.resolve(responses).await;
    assert_eq!(devices.len(), 1);

    let device = &devices[0];
    assert_eq!(device.identifier, SERIAL);
    assert_eq!(device.serial, SERIAL);
    assert_eq!(device.model, "Panasonic VIErA TX-49DX600EA");
    assert_eq!(device.manufacturer, "Panasonic");
    assert!(device.encrypted);
    assert_eq!(
        device.port,
        Url::parse(&server.uri()).unwrap().port().unwrap()
    );
}

#[tokio::test]
async fn test_missing_specs_document_means_plain_control() {
    let (server, discovery) = setup().await;
    mount_descriptors(&server, None).await;

    let devices = discovery
        .resolve(vec![response(&server, &format!("uuid:{SERIAL}"))])
        .await;
    assert_eq!(devices.len(), 1);
    assert!(!devices[0].encrypted);
}

#[tokio::test]
async fn test_malformed_descriptor_skips_only_that_device() {
    let (server, discovery) = setup().await;
    mount_descriptors(&server, Some(SPECS)).await;

    Mock::given(method("GET"))
        .and(path("/broken/ddd.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<root><device><UDN>"))
        .mount(&server)
        .await;

    let broken = SsdpResponse {
        location: Url::parse(&format!("{}/broken/ddd.xml", server.uri())).unwrap(),
        usn: "uuid:broken".into(),
    };

    let devices = discovery
        .resolve(vec![broken, response(&server, &format!("uuid:{SERIAL}"))])
        .await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].serial, SERIAL);
}
