//! JA3 parsing and ClientHello synthesis end to end.

use mimic::fingerprint::ext::{is_grease, Extension, GreaseSeed, GREASE_PLACEHOLDER};
use mimic::fingerprint::ja3::{parse_extension_ids, tlsver};
use mimic::{ClientHelloSpec, ErrorKind};

const CHROME_JA3: &str = "771,4865-4866-4867,0-23-65281,29-23-24,0";

#[test]
fn chrome_ja3_fields() {
    let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
    assert_eq!(spec.tls_vers_max, tlsver::TLS1_3);
    assert_eq!(spec.tls_vers_min, tlsver::TLS1_2);
    assert_eq!(spec.cipher_suites, vec![GREASE_PLACEHOLDER, 4865, 4866, 4867]);
    assert!(matches!(spec.extensions.first(), Some(Extension::Grease { .. })));
    assert!(matches!(spec.extensions.last(), Some(Extension::Grease { .. })));

    let curves = spec
        .extensions
        .iter()
        .find_map(|e| match e {
            Extension::SupportedCurves { curves } => Some(curves.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(curves, vec![GREASE_PLACEHOLDER, 29, 23, 24]);
}

#[test]
fn malformed_ja3_is_config_error() {
    for bad in [
        "",
        "771",
        "771,4865,0,29",
        "768,4865,0,29,0",
        "771,xyz,0,29,0",
        "771,4865,zzz,29,0",
    ] {
        let err = ClientHelloSpec::from_ja3(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config, "input {bad:?}");
    }
}

#[test]
fn serialization_preserves_extension_order_and_count() {
    let ja3 = "771,4865-4866-4867,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513,29-23-24,0";
    let spec = ClientHelloSpec::from_ja3(ja3).unwrap();
    let seed = GreaseSeed::sample();
    let msg = spec.serialize_with_seed(&seed);
    let wire: Vec<u16> = parse_extension_ids(&msg)
        .unwrap()
        .iter()
        .map(|(id, _)| *id)
        .collect();

    // Count: every listed extension plus the two GREASE bookends.
    assert_eq!(wire.len(), 15 + 2);
    assert!(is_grease(wire[0]));
    assert!(is_grease(*wire.last().unwrap()));
    assert_ne!(wire[0], *wire.last().unwrap());

    // Order modulo GREASE matches the JA3 exactly.
    let middle: Vec<u16> = wire[1..wire.len() - 1].to_vec();
    assert_eq!(
        middle,
        vec![0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513]
    );

    // Round-trip back to the JA3 string.
    assert_eq!(spec.ja3(), ja3);
}

#[test]
fn grease_values_are_fresh_per_serialization() {
    let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
    let a = spec.serialize_with_seed(&GreaseSeed {
        cipher: 0x1a1a,
        group: 0x2a2a,
        ext_first: 0x3a3a,
        ext_last: 0x4a4a,
        version: 0x5a5a,
    });
    let ids_a: Vec<u16> = parse_extension_ids(&a).unwrap().iter().map(|(i, _)| *i).collect();
    assert_eq!(ids_a[0], 0x3a3a);
    assert_eq!(*ids_a.last().unwrap(), 0x4a4a);
}

#[test]
fn supported_versions_derived_from_version_token() {
    // An explicit 43 in the extension list still gets the version pair
    // from the JA3 version token.
    let spec = ClientHelloSpec::from_ja3("770,4865,43,29,0").unwrap();
    let versions = spec
        .extensions
        .iter()
        .find_map(|e| match e {
            Extension::SupportedVersions { versions } => Some(versions.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(versions, vec![GREASE_PLACEHOLDER, tlsver::TLS1_2, tlsver::TLS1_1]);
}

#[test]
fn default_materialization_contract() {
    // The behavioral contract for defaults built with no payload.
    match Extension::materialize(16) {
        Extension::Alpn { protocols } => assert_eq!(protocols, vec!["h2", "http/1.1"]),
        other => panic!("unexpected {other:?}"),
    }
    match Extension::materialize(45) {
        Extension::PskKeyExchangeModes { modes } => assert_eq!(modes, vec![1]),
        other => panic!("unexpected {other:?}"),
    }
    match Extension::materialize(27) {
        Extension::CompressCertificate { algs } => assert_eq!(algs, vec![2]),
        other => panic!("unexpected {other:?}"),
    }
    match Extension::materialize(17513) {
        Extension::ApplicationSettings { protocols } => {
            assert_eq!(protocols, vec!["h2", "http/1.1"])
        }
        other => panic!("unexpected {other:?}"),
    }
    match Extension::materialize(13) {
        Extension::SignatureAlgorithms { algs } => assert_eq!(algs.len(), 8),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        Extension::materialize(30031),
        Extension::ChannelId { old: true }
    ));
}

#[test]
fn profiles_parse_and_round_trip() {
    for profile in [mimic::Profile::Chrome, mimic::Profile::Firefox, mimic::Profile::Safari] {
        let spec = profile.client_hello().unwrap();
        assert_eq!(spec.ja3(), profile.ja3());
        let msg = spec.serialize();
        assert!(parse_extension_ids(&msg).unwrap().len() >= 3);
    }
}
