/// Execute an aggregate command in memory: decide, then apply each event.
///
/// No persistence and no publication; the infra services do that around the
/// same two steps. Useful in tests and for previewing a command's outcome.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: mealflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
