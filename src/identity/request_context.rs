/// Who is acting on a mutating store call. The store uses it for provenance rows and
/// row-level policy; nothing above the store interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub role: String,
    pub login: String,
}
