#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}

/// Declares a construction-rule template.
///
/// `partition_stats`, `value_block` and `selection` are optional and default
/// to "absent" / `false`.
#[macro_export]
macro_rules! template {
    (
        name: $name:expr,
        family: $family:expr,
        result: $result:expr,
        slots: [ $($slot:expr),* $(,)? ]
        $(, partition_stats: $ps:expr)?
        $(, value_block: $vb:expr)?
        $(, selection: $sel:expr)?
        $(,)?
    ) => {{
        std::sync::Arc::new($crate::Template {
            name: $name,
            family: $family,
            result: $result,
            slots: &[ $($slot),* ],
            selection: { false $(|| $sel)? },
            partition_stats: { None::<&'static str> $(.or(Some($ps)))? },
            value_block: { None::<&'static str> $(.or(Some($vb)))? },
        })
    }};
}
