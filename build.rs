fn main() {
    // The LogService has no `.proto` file: messages are hand-written prost
    // structs in `persistence::grpc`, so only the service glue is generated.
    let service = tonic_build::manual::Service::builder()
        .name("LogService")
        .package("logs")
        .method(
            tonic_build::manual::Method::builder()
                .name("write_log")
                .route_name("WriteLog")
                .input_type("crate::persistence::grpc::LogRequest")
                .output_type("crate::persistence::grpc::LogResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
