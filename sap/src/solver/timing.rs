use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Timings {
    /// Building the model: permutations, Delassus approximation and the constraint bundle.
    pub model: Duration,
    /// Cost, gradient and impulse evaluations outside of the line search.
    pub evaluation: Duration,
    pub hessian: Duration,
    pub linear_solve: Duration,
    pub line_search: Duration,
    pub total: Duration,
}

impl Display for Timings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Timings (ms):")?;
        writeln!(f, "  Model construction time:  {}", self.model.as_millis())?;
        writeln!(f, "  Evaluation time:          {}", self.evaluation.as_millis())?;
        writeln!(f, "  Hessian assembly time:    {}", self.hessian.as_millis())?;
        writeln!(f, "  Linear solve time:        {}", self.linear_solve.as_millis())?;
        writeln!(f, "  Line search time:         {}", self.line_search.as_millis())?;
        writeln!(f, "  Total solve time:         {}", self.total.as_millis())
    }
}
