use relay_core::CoreError;
use relay_types::RelayError;

#[test]
fn no_gateways_configured_maps_to_unavailable() {
    let err: RelayError = CoreError::NoGatewaysConfigured.into();
    assert!(matches!(err, RelayError::Unavailable { .. }));
}

#[test]
fn decode_error_maps_to_invalid_arg() {
    let err: RelayError = CoreError::decode("XYZ", "truncated frame").into();
    assert!(matches!(err, RelayError::InvalidArg(_)));
}

#[test]
fn internal_error_maps_to_internal() {
    let err: RelayError = CoreError::Internal("double close".to_string()).into();
    assert!(matches!(err, RelayError::Internal(_)));
}
