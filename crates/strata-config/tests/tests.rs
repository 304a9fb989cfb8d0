// Integration-test harness for strata-config; one binary for the whole suite.

mod suite;
