mod tests_delete_table;
