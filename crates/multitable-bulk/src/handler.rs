//! The common face of bulk mutation handlers.

use crate::cte::CteHandler;
use crate::direct::DirectHandler;
use crate::inline::InlineHandler;
use crate::insert::TableBasedInsertHandler;
use crate::session::BulkSession;
use crate::table_based::TableBasedHandler;
use multitable_core::{Connection, Cx, Error, MutationTarget, Outcome};
use multitable_query::{MutationKind, QueryParameterBindings};

/// A compiled bulk statement, ready to run any number of times.
///
/// Handlers hold no per-execution state; everything that varies between
/// runs arrives through the session and the query parameters.
pub trait MultiTableHandler: Send + Sync {
    fn mutation_target(&self) -> &MutationTarget;

    fn kind(&self) -> MutationKind;

    /// The statements issued by one execution, in order.
    fn sql_statements(&self) -> Vec<String>;

    /// Run the operation and return the number of affected entities.
    fn execute<C: Connection>(
        &self,
        cx: &Cx,
        session: &BulkSession<C>,
        query: &QueryParameterBindings,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

/// Handler chosen by a strategy for one statement.
#[derive(Debug)]
pub enum BulkHandler {
    Direct(DirectHandler),
    TableBased(TableBasedHandler),
    TableBasedInsert(TableBasedInsertHandler),
    Cte(CteHandler),
    Inline(InlineHandler),
}

impl BulkHandler {
    /// Short name of the handler variant, for logs.
    pub fn variant(&self) -> &'static str {
        match self {
            BulkHandler::Direct(_) => "direct",
            BulkHandler::TableBased(_) => "table_based",
            BulkHandler::TableBasedInsert(_) => "table_based_insert",
            BulkHandler::Cte(_) => "cte",
            BulkHandler::Inline(_) => "inline",
        }
    }
}

impl MultiTableHandler for BulkHandler {
    fn mutation_target(&self) -> &MutationTarget {
        match self {
            BulkHandler::Direct(h) => h.mutation_target(),
            BulkHandler::TableBased(h) => h.mutation_target(),
            BulkHandler::TableBasedInsert(h) => h.mutation_target(),
            BulkHandler::Cte(h) => h.mutation_target(),
            BulkHandler::Inline(h) => h.mutation_target(),
        }
    }

    fn kind(&self) -> MutationKind {
        match self {
            BulkHandler::Direct(h) => h.kind(),
            BulkHandler::TableBased(h) => h.kind(),
            BulkHandler::TableBasedInsert(_) => MutationKind::Insert,
            BulkHandler::Cte(h) => h.kind(),
            BulkHandler::Inline(h) => h.kind(),
        }
    }

    fn sql_statements(&self) -> Vec<String> {
        match self {
            BulkHandler::Direct(h) => h.sql_statements(),
            BulkHandler::TableBased(h) => h.sql_statements(),
            BulkHandler::TableBasedInsert(h) => h.sql_statements(),
            BulkHandler::Cte(h) => h.sql_statements(),
            BulkHandler::Inline(h) => h.sql_statements(),
        }
    }

    fn execute<C: Connection>(
        &self,
        cx: &Cx,
        session: &BulkSession<C>,
        query: &QueryParameterBindings,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            match self {
                BulkHandler::Direct(h) => h.execute(cx, session, query).await,
                BulkHandler::TableBased(h) => h.execute(cx, session, query).await,
                BulkHandler::TableBasedInsert(h) => h.execute(cx, session, query).await,
                BulkHandler::Cte(h) => h.execute(cx, session, query).await,
                BulkHandler::Inline(h) => h.execute(cx, session, query).await,
            }
        }
    }
}
