use crate::jvm::code::Anchor;
use crate::jvm::{Error, IllegalState, SymbolId};

/// One exception table row, with positions not yet resolved
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExceptionRow {
    /// Start of the protected range (inclusive)
    pub start: Anchor,

    /// End of the protected range (exclusive)
    pub end: Anchor,

    pub handler: Anchor,

    /// Caught class, or `None` for any exception (`finally`)
    pub catch_type: Option<SymbolId>,
}

#[derive(Debug)]
struct TryRecord {
    start: Anchor,

    /// Set by the first handler, which closes the protected range
    end: Option<Anchor>,
    catches: Vec<(SymbolId, Anchor)>,
    catch_all: Option<Anchor>,
}

impl TryRecord {
    fn end_at(&mut self, here: Anchor) -> Anchor {
        *self.end.get_or_insert(here)
    }
}

/// Lowers nested `try`/`catch`/`finally` blocks into exception table rows
///
/// Every open `try` is a record on a stack. Handlers attach to the innermost record, and the first
/// handler of a record closes its protected range: all of the record's handlers protect the same
/// instructions. Closing a record produces its rows: the typed catches in registration order,
/// then the catch-all row. Inner records are closed first, so the rows of an inner `try` come
/// before the rows of the `try` around it. That is the order in which the JVM searches handlers.
///
/// Only the table is synthesized here. The copies of a `finally` body (on the normal path and at
/// the end of every catch) are emitted by `MethodDescriptor::try_catch_finally`.
#[derive(Debug, Default)]
pub struct ExceptionTableBuilder {
    open: Vec<TryRecord>,
    rows: Vec<ExceptionRow>,
}

impl ExceptionTableBuilder {
    pub fn new() -> ExceptionTableBuilder {
        ExceptionTableBuilder::default()
    }

    /// Number of `try` blocks not yet closed
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Open a `try` whose protected range starts at `start`
    pub fn begin_try(&mut self, start: Anchor) {
        self.open.push(TryRecord {
            start,
            end: None,
            catches: vec![],
            catch_all: None,
        });
    }

    /// End the protected range of the innermost `try` at `here`, ahead of its first handler
    ///
    /// Code emitted between this point and the first handler (such as a copy of the `finally`
    /// body on the normal path) is not protected by the `try`.
    pub fn end_protected_range(&mut self, here: Anchor) -> Result<(), Error> {
        let record = self.open.last_mut().ok_or(Error::NoOpenTryBlock)?;
        if record.end.is_some() {
            return Err(Error::IllegalState(IllegalState::ProtectedRangeClosed));
        }
        record.end_at(here);
        Ok(())
    }

    /// Register a `catch` handler starting at `here`, for each of the given types
    ///
    /// An empty list of types catches everything, just like `finally`.
    pub fn process_catch(&mut self, types: &[SymbolId], here: Anchor) -> Result<(), Error> {
        if types.is_empty() {
            return self.process_finally(here);
        }

        let record = self.open.last_mut().ok_or(Error::NoOpenTryBlock)?;
        if record.catch_all.is_some() {
            return Err(Error::CatchAfterFinally);
        }
        for (index, catch_type) in types.iter().enumerate() {
            let seen_before = record.catches.iter().any(|(seen, _)| seen == catch_type)
                || types[..index].contains(catch_type);
            if seen_before {
                return Err(Error::DuplicateCatchType(*catch_type));
            }
        }

        record.end_at(here);
        record
            .catches
            .extend(types.iter().map(|catch_type| (*catch_type, here)));
        Ok(())
    }

    /// Register the `finally` (catch-all) handler starting at `here`
    pub fn process_finally(&mut self, here: Anchor) -> Result<(), Error> {
        let record = self.open.last_mut().ok_or(Error::NoOpenTryBlock)?;
        if record.catch_all.is_some() {
            return Err(Error::DuplicateFinally);
        }
        record.end_at(here);
        record.catch_all = Some(here);
        Ok(())
    }

    /// Close the innermost `try`, returning its rows
    pub fn process_end(&mut self) -> Result<Vec<ExceptionRow>, Error> {
        let record = self.open.pop().ok_or(Error::NoOpenTryBlock)?;
        let end = match record.end {
            Some(end) => end,
            None => return Err(Error::TryWithoutHandlers),
        };

        let start = record.start;
        let typed = record
            .catches
            .iter()
            .map(|(catch_type, handler)| ExceptionRow {
                start,
                end,
                handler: *handler,
                catch_type: Some(*catch_type),
            });
        let catch_all = record.catch_all.map(|handler| ExceptionRow {
            start,
            end,
            handler,
            catch_type: None,
        });
        let rows: Vec<ExceptionRow> = typed.chain(catch_all).collect();

        self.rows.extend_from_slice(&rows);
        Ok(rows)
    }

    /// Rows of every closed `try`, failing if some are still open
    pub fn finish(self) -> Result<Vec<ExceptionRow>, Error> {
        if !self.open.is_empty() {
            return Err(Error::UnclosedTryBlocks(self.open.len()));
        }
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::code::{InstructionStream, StackCalculation};
    use crate::jvm::{SymbolResolver, SymbolTable};

    fn anchors(count: usize) -> Vec<Anchor> {
        let mut stream = InstructionStream::new(StackCalculation::Optimistic);
        (0..count).map(|_| stream.mark()).collect()
    }

    #[test]
    fn two_catches_and_finally() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let io = symbols.intern_name("java.io.IOException");
        let state = symbols.intern_name("java.lang.IllegalStateException");
        let at = anchors(4);

        let mut builder = ExceptionTableBuilder::new();
        builder.begin_try(at[0]);
        builder.process_catch(&[io], at[1])?;
        builder.process_catch(&[state], at[2])?;
        builder.process_finally(at[3])?;
        let rows = builder.process_end()?;

        let row = |handler: Anchor, catch_type| ExceptionRow {
            start: at[0],
            end: at[1],
            handler,
            catch_type,
        };
        assert_eq!(
            rows,
            vec![
                row(at[1], Some(io)),
                row(at[2], Some(state)),
                row(at[3], None)
            ]
        );
        assert_eq!(builder.finish()?, rows);
        Ok(())
    }

    #[test]
    fn range_closed_ahead_of_handlers() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let io = symbols.intern_name("java.io.IOException");
        let at = anchors(4);

        let mut builder = ExceptionTableBuilder::new();
        builder.begin_try(at[0]);
        builder.end_protected_range(at[1])?;
        assert!(matches!(
            builder.end_protected_range(at[2]),
            Err(Error::IllegalState(IllegalState::ProtectedRangeClosed))
        ));
        builder.process_catch(&[io], at[2])?;
        builder.process_finally(at[3])?;
        let rows = builder.process_end()?;
        assert!(rows.iter().all(|row| row.end == at[1]));
        assert_eq!(rows[1].handler, at[3]);
        Ok(())
    }

    #[test]
    fn nested_tries_are_independent() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let io = symbols.intern_name("java.io.IOException");
        let at = anchors(4);

        let mut builder = ExceptionTableBuilder::new();
        builder.begin_try(at[0]);
        builder.begin_try(at[1]);
        builder.process_catch(&[io], at[2])?;
        let inner = builder.process_end()?;
        builder.process_catch(&[io], at[3])?;
        let outer = builder.process_end()?;

        assert_eq!(inner.len(), 1);
        assert_eq!((inner[0].start, inner[0].end), (at[1], at[2]));
        assert_eq!(outer.len(), 1);
        assert_eq!((outer[0].start, outer[0].end), (at[0], at[3]));
        assert_eq!(builder.finish()?, vec![inner[0], outer[0]]);
        Ok(())
    }

    #[test]
    fn multi_catch() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let io = symbols.intern_name("java.io.IOException");
        let state = symbols.intern_name("java.lang.IllegalStateException");
        let at = anchors(2);

        let mut builder = ExceptionTableBuilder::new();
        builder.begin_try(at[0]);
        builder.process_catch(&[io, state], at[1])?;
        let rows = builder.process_end()?;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.handler == at[1]));
        Ok(())
    }

    #[test]
    fn misuse() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let io = symbols.intern_name("java.io.IOException");
        let at = anchors(3);
        let mut builder = ExceptionTableBuilder::new();

        assert!(matches!(
            builder.process_catch(&[io], at[0]),
            Err(Error::NoOpenTryBlock)
        ));
        assert!(matches!(
            builder.process_end(),
            Err(Error::NoOpenTryBlock)
        ));

        builder.begin_try(at[0]);
        assert!(matches!(
            builder.process_catch(&[io, io], at[1]),
            Err(Error::DuplicateCatchType(_))
        ));
        builder.process_catch(&[io], at[1])?;
        assert!(matches!(
            builder.process_catch(&[io], at[2]),
            Err(Error::DuplicateCatchType(_))
        ));
        builder.process_finally(at[2])?;
        assert!(matches!(
            builder.process_finally(at[2]),
            Err(Error::DuplicateFinally)
        ));
        assert!(matches!(
            builder.process_catch(&[io], at[2]),
            Err(Error::CatchAfterFinally)
        ));
        builder.process_end()?;

        builder.begin_try(at[0]);
        assert!(matches!(
            builder.process_end(),
            Err(Error::TryWithoutHandlers)
        ));

        builder.begin_try(at[0]);
        assert!(matches!(
            builder.finish(),
            Err(Error::UnclosedTryBlocks(1))
        ));
        Ok(())
    }
}
