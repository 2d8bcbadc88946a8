mod tests_reconcile;
