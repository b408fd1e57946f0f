// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Order lifecycle rules, independent of storage and transport.
// Persistence lives in src/store/, event delivery in src/messaging/.
//
// ============================================================================

pub mod order;
