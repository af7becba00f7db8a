mod test_utils;

use na::{DMatrix, DVector};
use sap::*;
pub use test_utils::*;

#[test]
fn no_constraints() -> Result<(), Error> {
    init_logger();
    let a = vec![DMatrix::identity(3, 3), DMatrix::identity(2, 2) * 4.0];
    let v_star = DVector::from_row_slice(&[1.0, 2.0, 3.0, -1.0, -2.0]);
    let problem = SapContactProblem::new(TIME_STEP, a, v_star)?;
    let results = SapSolver::default().solve(&problem)?;
    assert_eq!(&results.v, problem.v_star());
    assert_eq!(results.iterations(), 0);
    assert_eq!(results.num_constraints(), 0);
    assert_eq!(results.tau, DVector::zeros(5));

    // The guess is irrelevant without constraints.
    let results = SapSolver::default().solve_with_guess(&problem, &DVector::zeros(5))?;
    assert_eq!(&results.v, problem.v_star());
    Ok(())
}

#[test]
fn no_cliques() -> Result<(), Error> {
    let problem = SapContactProblem::new(TIME_STEP, Vec::new(), DVector::zeros(0))?;
    let results = SapSolver::default().solve(&problem)?;
    assert_eq!(results.v.len(), 0);
    Ok(())
}

#[test]
fn invalid_problems() {
    assert!(matches!(
        SapContactProblem::new(0.0, vec![DMatrix::identity(1, 1)], DVector::zeros(1)),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        SapContactProblem::new(TIME_STEP, vec![DMatrix::identity(2, 2)], DVector::zeros(3)),
        Err(Error::SizeMismatch { .. })
    ));
    let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
    assert!(matches!(
        SapContactProblem::new(TIME_STEP, vec![indefinite], DVector::zeros(2)),
        Err(Error::NotPositiveDefinite { clique: 0 })
    ));
}

#[test]
fn constraint_on_missing_clique() -> Result<(), Error> {
    let mut problem = make_sphere_on_ground_problem(0.5, 1.0, -1.0)?;
    let jacobian = ConstraintJacobian::single(1, DMatrix::identity(3, 3));
    let contact = FrictionConeConstraint::new(jacobian, 0.0, FrictionConeParameters::default())?;
    assert!(matches!(
        problem.add_constraint(Box::new(contact)),
        Err(Error::OutOfRange { index: 1, size: 1 })
    ));
    assert_eq!(problem.num_constraints(), 1);
    Ok(())
}

#[test]
fn parameters_round_trip_through_ron() -> Result<(), Box<dyn std::error::Error>> {
    let params = SapSolverParameters {
        rel_tolerance: 1e-8,
        max_iterations: 30,
        line_search: LineSearch::default_backtracking(),
        linear_solver: LinearSolverType::SparseLdl,
        ..Default::default()
    };
    let serialized = ron::to_string(&params)?;
    let deserialized: SapSolverParameters = ron::from_str(&serialized)?;
    assert_eq!(deserialized, params);

    // Missing fields take their default values.
    let partial: SapSolverParameters = ron::from_str("(max_iterations: 7)")?;
    assert_eq!(
        partial,
        SapSolverParameters {
            max_iterations: 7,
            ..Default::default()
        }
    );

    let contact = FrictionConeParameters {
        mu: 0.8,
        stiffness: 1.0e5,
        ..Default::default()
    };
    let deserialized: FrictionConeParameters = ron::from_str(&ron::to_string(&contact)?)?;
    assert_eq!(deserialized, contact);
    Ok(())
}

#[test]
fn invalid_solver_parameters() {
    let params = SapSolverParameters {
        line_search: LineSearch::Exact {
            alpha_max: 0.0,
            tolerance: 1e-8,
            max_iterations: 10,
        },
        ..Default::default()
    };
    assert!(matches!(
        SapSolver::new(params),
        Err(Error::InvalidParameter { name }) if name == "line_search.alpha_max"
    ));
}
