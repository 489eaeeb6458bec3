//! View assignment as decided by the view authority, plus the polling
//! interface through which a server learns it.

use std::fmt;

use crate::utils::{PbkvError, tcp_call};

use async_trait::async_trait;

use serde::{Serialize, Deserialize};

use tokio::time::Duration;

/// View number type.
pub type ViewNum = u64;

/// Server identity type; the address string the server listens on.
pub type ServerName = String;

/// The (viewnum, primary, backup) assignment. A view is always replaced
/// wholesale by a newer one, never mutated in place.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct View {
    /// Monotonically increasing view number.
    pub viewnum: ViewNum,

    /// Current primary, if any.
    pub primary: Option<ServerName>,

    /// Current backup, if any.
    pub backup: Option<ServerName>,
}

impl View {
    /// Creates a view with given roles.
    pub fn new(
        viewnum: ViewNum,
        primary: Option<ServerName>,
        backup: Option<ServerName>,
    ) -> Self {
        View {
            viewnum,
            primary,
            backup,
        }
    }

    /// Is `me` the primary of this view?
    #[inline]
    pub fn is_primary(&self, me: &str) -> bool {
        self.primary.as_deref() == Some(me)
    }

    /// Is `me` the backup of this view?
    #[inline]
    pub fn is_backup(&self, me: &str) -> bool {
        self.backup.as_deref() == Some(me)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<{} p:{} b:{}>",
            self.viewnum,
            self.primary.as_deref().unwrap_or("-"),
            self.backup.as_deref().unwrap_or("-")
        )
    }
}

/// The view authority's polling interface as consumed by a server. An `Err`
/// means "no new information this time"; callers keep their last view.
#[async_trait]
pub trait ViewService: Send + Sync {
    /// Reports liveness of `me` having seen view `viewnum`, and gets back
    /// the authority's current view.
    async fn ping(&self, me: &str, viewnum: ViewNum)
        -> Result<View, PbkvError>;
}

/// Request sent to a remote view authority.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ViewRequest {
    Ping { me: ServerName, viewnum: ViewNum },
}

/// Reply from a remote view authority.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ViewReply {
    View(View),
}

/// View authority stub that talks to a remote authority over framed TCP.
#[derive(Debug, Clone)]
pub struct ViewClerk {
    /// Address of the view authority.
    addr: String,

    /// Timeout of each ping exchange.
    timeout: Duration,
}

impl ViewClerk {
    /// Creates a new view authority clerk.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        ViewClerk {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ViewService for ViewClerk {
    async fn ping(
        &self,
        me: &str,
        viewnum: ViewNum,
    ) -> Result<View, PbkvError> {
        let req = ViewRequest::Ping {
            me: me.into(),
            viewnum,
        };
        let ViewReply::View(view) =
            tcp_call(&self.addr, &req, self.timeout).await?;
        Ok(view)
    }
}
