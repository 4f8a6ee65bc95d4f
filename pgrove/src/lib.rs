//! Postgres Driver
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use pgrove::Connection;
//!
//! # async fn app() -> pgrove::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let res = pgrove::query::<_, _, (i32,String)>("SELECT 420,$1", &mut conn)
//!     .bind("Foo")
//!     .fetch_one()
//!     .await?;
//!
//! assert_eq!(res.0,420);
//! assert_eq!(res.1.as_str(),"Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Database Pooling:
//!
//! ```no_run
//! use pgrove::Pool;
//!
//! # async fn app() -> pgrove::Result<()> {
//! let mut pool = Pool::connect_env().await?;
//!
//! pgrove::execute("CREATE TEMP TABLE foo(id int)", &mut pool)
//!     .execute()
//!     .await?;
//!
//! let mut handles = vec![];
//!
//! for i in 0..14 {
//!     let mut pool = pool.clone();
//!     let t = tokio::spawn(async move {
//!         pgrove::execute("INSERT INTO foo(id) VALUES($1)", &mut pool)
//!             .bind(i)
//!             .execute()
//!             .await
//!     });
//!     handles.push(t);
//! }
//!
//! for h in handles {
//!     h.await.unwrap();
//! }
//!
//! let foos = pgrove::query::<_, _, (i32,)>("SELECT * FROM foo", &mut pool)
//!     .fetch_all()
//!     .await?;
//!
//! assert_eq!(foos.len(), 14);
//!
//! # Ok(())
//! # }
//! # mod tokio { pub fn spawn<F>(_: F) -> F { todo!() } }
//! ```
//!
//! Deadlines and failover:
//!
//! ```no_run
//! use std::time::Duration;
//! use pgrove::{Pool, failover::{Retry, RoleBased}};
//!
//! # async fn app() -> pgrove::Result<()> {
//! let pool = Pool::connect_lazy("postgres://user@primary/app")?;
//! let replica = Pool::connect_lazy("postgres://user@replica/app")?;
//!
//! let source = RoleBased::new("primary", pool)
//!     .fallback("replica", replica);
//!
//! let source = Retry::new(source)
//!     .tries(3)
//!     .timeout(Duration::from_secs(1));
//!
//! let (n,) = pgrove::query::<_, _, (i64,)>("SELECT count(*) FROM foo", source)
//!     .timeout(Duration::from_millis(500))
//!     .fetch_one()
//!     .await?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod net;
mod ext;

// Protocol
pub mod postgres;

// Encoding
mod value;
pub mod encode;
pub mod types;
pub mod oid;

// Component
mod statement;
pub mod sql;
pub mod row;
pub mod deadline;

// Operation
pub mod transport;
pub mod executor;
pub mod fetch;
pub mod query;
pub mod transaction;
pub mod cancel;

// Connection
pub mod connection;
pub mod pool;
pub mod failover;

pub mod error;

#[cfg(test)]
mod test_support;


pub use encode::Encode;
pub use row::{Row, Column, FromRow, Decode, DecodeError};
pub use sql::SqlExt;
pub use types::Nullable;
pub use oid::OidMap;
pub use postgres::{PgName, PgType};
pub use deadline::Deadline;

pub use executor::{Connector, Executor};
pub use connection::{Connection, Config};
pub use pool::{Pool, PoolConfig};
pub use failover::{Retry, RoleBased};
pub use cancel::CancelHandle;
#[doc(inline)]
pub use query::{query, query_row, execute};
pub use transaction::begin;
pub use error::{Error, ErrorCondition, ErrorKind, Result};
