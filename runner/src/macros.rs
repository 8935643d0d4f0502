//! Useful macros.

/// Join the given path components with `/`, avoiding doubled separators.
///
/// ```rust,ignore
/// let settings = dir!(working_dir, "src/conf", "DFI.conf");
/// ```
#[macro_export]
macro_rules! dir {
    ($first:expr $(, $part:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut path = String::from($first);
        $(
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(AsRef::<str>::as_ref(&$part).trim_start_matches('/'));
        )*
        path
    }};
}

/// Time the given expression, pushing `(label, duration)` onto `timers`, and evaluate to the
/// value of the expression.
#[macro_export]
macro_rules! time {
    ($timers:ident, $label:expr, $expr:expr) => {{
        let start = std::time::Instant::now();
        let result = $expr;
        let duration = start.elapsed();
        $timers.push(($label, duration));
        result
    }};
}
