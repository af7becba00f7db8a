//! Small contact problems used in tests and benchmarks.

use na::{DMatrix, DVector};

use crate::*;

pub const TIME_STEP: f64 = 0.01;
pub const GRAVITY: f64 = 9.81;

/// A point mass resting on rigid ground at zero distance with free motion velocity
/// `[0, 0, vn_star]`.
///
/// The single clique has three velocities `[vx, vy, vz]` and the contact frame is aligned with
/// the world frame so that the contact Jacobian is the identity.
pub fn make_sphere_on_ground_problem(
    mu: f64,
    mass: f64,
    vn_star: f64,
) -> Result<SapContactProblem, Error> {
    let mut problem = SapContactProblem::new(
        TIME_STEP,
        vec![DMatrix::identity(3, 3) * mass],
        DVector::from_row_slice(&[0.0, 0.0, vn_star]),
    )?;
    let params = FrictionConeParameters {
        mu,
        ..Default::default()
    };
    let jacobian = ConstraintJacobian::single(0, DMatrix::identity(3, 3));
    problem.add_constraint(Box::new(FrictionConeConstraint::new(jacobian, 0.0, params)?))?;
    Ok(problem)
}

/// A vertical stack of `n` unit point masses on rigid ground.
///
/// Each mass is a clique with three velocities. Mass `i` touches mass `i − 1` (or the ground
/// for `i = 0`) and is given a lateral free motion velocity proportional to its height so that
/// some contacts slide while others stick.
pub fn make_box_stack_problem(n: usize) -> Result<SapContactProblem, Error> {
    let a = vec![DMatrix::identity(3, 3); n];
    let v_star = DVector::from_fn(3 * n, |i, _| match i % 3 {
        0 => 0.05 * (i / 3) as f64,
        1 => -0.02 * (i / 3) as f64,
        _ => -GRAVITY * TIME_STEP,
    });
    let mut problem = SapContactProblem::new(TIME_STEP, a, v_star)?;
    let params = FrictionConeParameters {
        mu: 0.4,
        ..Default::default()
    };

    let ground = ConstraintJacobian::single(0, DMatrix::identity(3, 3));
    problem.add_constraint(Box::new(FrictionConeConstraint::new(ground, 0.0, params)?))?;
    for i in 1..n {
        let jacobian = ConstraintJacobian::pair(
            i - 1,
            -DMatrix::identity(3, 3),
            i,
            DMatrix::identity(3, 3),
        )?;
        problem.add_constraint(Box::new(FrictionConeConstraint::new(jacobian, 0.0, params)?))?;
    }
    Ok(problem)
}

/// Three cliques of sizes 2, 1 and 1. Cliques 0 and 2 are pushed against position limits while
/// clique 1 is unconstrained.
pub fn make_two_cliques_with_limits_problem() -> Result<SapContactProblem, Error> {
    let a = vec![
        DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]),
        DMatrix::identity(1, 1) * 3.0,
        DMatrix::identity(1, 1) * 0.5,
    ];
    let v_star = DVector::from_row_slice(&[-2.0, 1.0, 0.7, 3.0]);
    let mut problem = SapContactProblem::new(TIME_STEP, a, v_star)?;
    problem.add_constraint(Box::new(LimitConstraint::new(
        0,
        0,
        2,
        0.0,
        -0.005,
        0.5,
        LimitParameters::default(),
    )?))?;
    problem.add_constraint(Box::new(LimitConstraint::new(
        2,
        0,
        1,
        0.99,
        f64::NEG_INFINITY,
        1.0,
        LimitParameters::default(),
    )?))?;
    Ok(problem)
}

/// Two single velocity cliques coupled with gear ratio `gear_ratio`, the first of which is
/// pushed by its free motion velocity.
pub fn make_coupler_problem(gear_ratio: f64) -> Result<SapContactProblem, Error> {
    let a = vec![DMatrix::identity(1, 1), DMatrix::identity(1, 1) * 2.0];
    let v_star = DVector::from_row_slice(&[1.0, 0.0]);
    let mut problem = SapContactProblem::new(TIME_STEP, a, v_star)?;
    let dof = |clique| CouplerDof {
        clique,
        clique_num_velocities: 1,
        dof: 0,
        position: 0.0,
    };
    let coupler = HolonomicConstraint::coupler(
        dof(0),
        dof(1),
        gear_ratio,
        0.0,
        HolonomicParameters::default(),
    )?;
    problem.add_constraint(Box::new(coupler))?;
    Ok(problem)
}
