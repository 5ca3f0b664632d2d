/// Runs a closure when dropped, so that kernel objects acquired part way
/// through a multi-step request are released on every exit path.
pub(crate) struct Cleanup<F>
where
    F: FnOnce(),
{
    f: Option<F>,
}

impl<F> Cleanup<F>
where
    F: FnOnce(),
{
    pub(crate) fn new(f: F) -> Self {
        Self { f: Some(f) }
    }
}

impl<F> Drop for Cleanup<F>
where
    F: FnOnce(),
{
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f()
        };
    }
}
