use easy_ext::ext;

pub(crate) mod prelude {
    pub(crate) use super::ErrorExt as _;
    pub(crate) use super::StrExt as _;
}

#[ext(ErrorExt)]
pub(crate) impl<E> E
where
    E: std::error::Error + ?Sized,
{
    fn display_chain(&self) -> display_error_chain::DisplayErrorChain<&Self> {
        display_error_chain::DisplayErrorChain::new(self)
    }
}

#[ext(StrExt)]
pub(crate) impl str {
    /// Number of Unicode scalar values in the string. Unlike [`str::len`]
    /// it counts multi-byte characters as one.
    fn code_points(&self) -> usize {
        self.chars().count()
    }
}
