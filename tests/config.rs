#![cfg(feature = "serde")]
use gn_pnp::gauss_newton::{GaussNewton, GaussNewtonParams};
use gn_pnp::PoseError;

#[test]
fn partial_config_uses_defaults() {
    let params: GaussNewtonParams =
        serde_json::from_str(r#"{ "gain": 0.5, "max_iterations": 50 }"#).unwrap();
    assert_eq!(params.gain, 0.5);
    assert_eq!(params.max_iterations, 50);
    assert_eq!(params.tolerance, GaussNewtonParams::default().tolerance);
    assert!(GaussNewton::new(params).is_ok());
}

#[test]
fn config_round_trip() {
    let params = GaussNewtonParams {
        tolerance: 0.0,
        relative_tolerance: 1e-9,
        ..Default::default()
    };
    let json = serde_json::to_string(&params).unwrap();
    let back: GaussNewtonParams = serde_json::from_str(&json).unwrap();
    assert_eq!(params, back);
}

#[test]
fn invalid_config_is_rejected_by_the_solver() {
    let params: GaussNewtonParams = serde_json::from_str(r#"{ "gain": -1.0 }"#).unwrap();
    assert!(matches!(
        GaussNewton::new(params),
        Err(PoseError::InvalidParams(_))
    ));
}
