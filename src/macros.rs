/// Build an [`Attrs`](crate::Attrs) map in place.
///
/// ```
/// use dbx::attrs;
///
/// let attrs = attrs! { "status" => 1, "nickname" => "ada" };
/// assert_eq!(attrs.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::Attrs::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Attrs::new();
        $(map.insert(($key).to_string(), $crate::Value::from($value));)+
        map
    }};
}
