use crate::context::Context;
use crate::error::Result;

/// A probabilistic program: an ordinary procedure that records named
/// sample and param sites through the [`Context`] it is handed.
///
/// Both models and guides implement this trait. Plain functions and
/// closures of the shape `Fn(&mut Context, &A) -> Result<O>` are models.
pub trait Model<A: ?Sized> {
    type Output;

    fn run(&self, ctx: &mut Context<'_>, args: &A) -> Result<Self::Output>;
}

impl<A, O, F> Model<A> for F
where
    A: ?Sized,
    F: Fn(&mut Context<'_>, &A) -> Result<O>,
{
    type Output = O;

    fn run(&self, ctx: &mut Context<'_>, args: &A) -> Result<O> {
        self(ctx, args)
    }
}
