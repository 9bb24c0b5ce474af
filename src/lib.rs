//! # querymind
//!
//! An NL-to-SQL query orchestration pipeline over a governed semantic layer.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   NL question + UserContext + conversation history       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [intent: C5]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     QueryPlan                             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planvalidate: C6]
//! ┌─────────────────────────────────────────────────────────┐
//! │             Validated plan against SemanticContext        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sqlgen: C7, sqlvalidate: C8, rls: C9]
//! ┌─────────────────────────────────────────────────────────┐
//! │                Governed, RLS-filtered SQL                 │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [executor: C10, analytics: C11]
//! ┌─────────────────────────────────────────────────────────┐
//! │           Paginated rows + post-processed analytics       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `orchestrator` (C12) drives the stages above; `semantic` (C1), `vector`
//! (C2), `connection` (C3), and `rls` (C4) are the governed stores every
//! stage reads from.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod executor;
pub mod intent;
pub mod model;
pub mod orchestrator;
pub mod planvalidate;
pub mod rls;
pub mod semantic;
pub mod sql;
pub mod sqlgen;
pub mod sqlvalidate;
pub mod vector;
pub mod worker;

// Re-export SQL submodules at crate level for backwards compatibility
pub use sql::ddl;
pub use sql::dialect;
pub use sql::dml;
pub use sql::expr;
pub use sql::query;
pub use sql::token;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::dialect::{Dialect, SqlDialect};
    pub use crate::expr::{
        // Constructors
        avg,
        coalesce,
        col,
        count,
        count_distinct,
        count_star,
        func,
        lit_bool,
        lit_float,
        lit_int,
        lit_null,
        lit_str,
        max,
        min,
        param,
        star,
        sum,
        table_col,
        table_star,
        // Types
        BinaryOperator,
        Expr,
        ExprExt,
        Literal,
        UnaryOperator,
    };
    pub use crate::query::{
        Cte, Join, JoinType, LimitOffset, NullsOrder, OrderByExpr, Query, SelectExpr, SortDir,
        TableRef,
    };
    pub use crate::token::{Token, TokenStream};
}

// Also export at crate root for convenience
pub use dialect::Dialect;
pub use expr::{col, count_star, lit_bool, lit_int, lit_str, sum, table_col, Expr, ExprExt};
pub use query::{OrderByExpr, Query, SelectExpr, TableRef};
pub use token::{Token, TokenStream};
