//! Property tests: every default transform maps `R^n` into its constraint and
//! inverts its own output.

use pp_core::tensor::from_vec;
use pp_prob::{biject_to, Constraint, Transform};
use proptest::prelude::*;

/// Constraint together with the length of its unconstrained vector.
fn cases() -> Vec<(Constraint, usize)> {
    vec![
        (Constraint::Real, 4),
        (Constraint::RealVector, 4),
        (Constraint::Positive, 4),
        (Constraint::greater_than(1.5), 4),
        (Constraint::less_than(-2.0), 4),
        (Constraint::interval(-1.0, 3.0), 4),
        (Constraint::UnitInterval, 4),
        (Constraint::Simplex, 4),
        (Constraint::OrderedVector, 4),
        (Constraint::LowerCholesky, 6),
        (Constraint::CorrCholesky, 3),
        (Constraint::CorrMatrix, 3),
        (Constraint::PositiveDefinite, 6),
    ]
}

proptest! {
    #[test]
    fn prop_default_transforms_round_trip(
        raw in proptest::collection::vec(-2.5f64..2.5, 6),
    ) {
        for (constraint, n) in cases() {
            let t = biject_to(&constraint).unwrap();
            let x = from_vec(&[n], raw[..n].to_vec()).unwrap();
            let y = t.forward(&x).unwrap();
            prop_assert!(constraint.check_all(&y).unwrap(), "{} produced {:?}", constraint, y);

            let back = t.inverse(&y).unwrap();
            prop_assert_eq!(back.shape(), x.shape());
            for (a, b) in back.iter().zip(x.iter()) {
                prop_assert!((a - b).abs() < 1e-6, "{}: {} vs {}", constraint, a, b);
            }

            let ladj = t.log_abs_det_jacobian(&x, &y).unwrap();
            prop_assert!(ladj.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn prop_batched_forward_matches_rowwise(
        raw in proptest::collection::vec(-2.0f64..2.0, 12),
    ) {
        let t = biject_to(&Constraint::Simplex).unwrap();
        let batched = t.forward(&from_vec(&[3, 4], raw.clone()).unwrap()).unwrap();
        for (i, row) in raw.chunks(4).enumerate() {
            let single = t.forward(&from_vec(&[4], row.to_vec()).unwrap()).unwrap();
            for (j, v) in single.iter().enumerate() {
                prop_assert!((batched[[i, j]] - v).abs() < 1e-12);
            }
        }
    }
}
